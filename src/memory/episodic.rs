//! 情景记忆：完成的工作单元（Episode）的存储、相似检索与预算化上下文
//!
//! 写入分两步：先写 DocumentStore（失败则向上传播），再嵌入摘要写入向量索引（失败只记录告警）。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::config::MemorySection;
use crate::core::error::{AgentError, AgentResult};
use crate::llm::{CompletionOptions, CompletionService, EmbeddingKind, EmbeddingService};
use crate::memory::scoring::{episode_score, relevance_rank};
use crate::memory::store::{DocumentStore, EpisodeFilter};
use crate::memory::token_budget::{greedy_fill, join_rendered};
use crate::memory::types::{Episode, EpisodeInput};
use crate::memory::vector::{Metadata, VectorIndex, VectorQuery, EPISODES_NAMESPACE};
use crate::memory::Message;

const MAX_CONTEXT_CANDIDATES: usize = 50;
pub const CONSOLIDATED_TAG: &str = "consolidated";

/// 相似检索参数
#[derive(Debug, Clone)]
pub struct EpisodeSearchOptions {
    pub limit: usize,
    pub session_id: Option<String>,
    pub topic: Option<String>,
    pub min_score: Option<f32>,
}

impl Default for EpisodeSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            session_id: None,
            topic: None,
            min_score: None,
        }
    }
}

impl EpisodeSearchOptions {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

/// 预算内选出的 episode（时间升序）及其渲染文本
#[derive(Debug, Clone, Default)]
pub struct EpisodicContext {
    pub episodes: Vec<Episode>,
    pub text: String,
    pub estimated_tokens: usize,
    pub truncated: bool,
}

/// 合并旧 episode 的时机
#[derive(Debug, Clone, Copy)]
pub struct ConsolidationPolicy {
    pub age_days: i64,
    pub min_group: usize,
}

impl Default for ConsolidationPolicy {
    fn default() -> Self {
        Self {
            age_days: 30,
            min_group: 5,
        }
    }
}

impl ConsolidationPolicy {
    pub fn from_config(config: &MemorySection) -> Self {
        Self {
            age_days: config.consolidation_age_days,
            min_group: config.consolidation_min_group.max(1),
        }
    }
}

/// 把同一会话的一组旧 episode 归纳成一条新 episode；返回 None 表示不合并
#[async_trait]
pub trait EpisodeConsolidator: Send + Sync {
    async fn consolidate(
        &self,
        session_id: &str,
        episodes: &[Episode],
    ) -> AgentResult<Option<EpisodeInput>>;
}

/// 默认不合并
pub struct NoopConsolidator;

#[async_trait]
impl EpisodeConsolidator for NoopConsolidator {
    async fn consolidate(
        &self,
        _session_id: &str,
        _episodes: &[Episode],
    ) -> AgentResult<Option<EpisodeInput>> {
        Ok(None)
    }
}

/// 请 LLM 写一段总结作为合并后的 episode
pub struct SummarizingConsolidator {
    llm: Arc<dyn CompletionService>,
}

impl SummarizingConsolidator {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl EpisodeConsolidator for SummarizingConsolidator {
    async fn consolidate(
        &self,
        session_id: &str,
        episodes: &[Episode],
    ) -> AgentResult<Option<EpisodeInput>> {
        let Some(first) = episodes.first() else {
            return Ok(None);
        };
        let listing = episodes
            .iter()
            .map(|e| format!("- {}", e.render()))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Summarize these research episodes into one paragraph that keeps every durable finding.\n\n{}",
            listing
        );
        let options = CompletionOptions::new().with_temperature(0.2);
        let summary = match self.llm.complete(&[Message::user(prompt)], &options).await {
            Ok(resp) if !resp.text().trim().is_empty() => resp.text().trim().to_string(),
            Ok(_) => return Ok(None),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "episode summary failed");
                return Ok(None);
            }
        };

        let mut input = EpisodeInput::new(session_id, first.topic.clone(), summary);
        input.findings = crate::memory::types::dedup_preserving(
            episodes.iter().flat_map(|e| e.findings.iter().cloned()),
        );
        input.duration_ms = episodes.iter().map(|e| e.duration_ms).sum();
        input.success = episodes.iter().any(|e| e.success);
        Ok(Some(input))
    }
}

/// consolidate 的结果
#[derive(Debug, Clone, Default)]
pub struct EpisodeConsolidation {
    pub groups_considered: usize,
    pub created: Vec<String>,
}

pub struct EpisodicManager {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingService>,
    consolidator: Arc<dyn EpisodeConsolidator>,
    candidate_limit: usize,
}

impl EpisodicManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            consolidator: Arc::new(NoopConsolidator),
            candidate_limit: MAX_CONTEXT_CANDIDATES,
        }
    }

    pub fn with_consolidator(mut self, consolidator: Arc<dyn EpisodeConsolidator>) -> Self {
        self.consolidator = consolidator;
        self
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit.clamp(1, MAX_CONTEXT_CANDIDATES);
        self
    }

    pub async fn store(&self, input: EpisodeInput) -> AgentResult<Episode> {
        let episode = Episode {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: input.session_id,
            timestamp: Utc::now(),
            topic: input.topic,
            actions: input.actions,
            outcomes: input.outcomes,
            findings: input.findings,
            duration_ms: input.duration_ms,
            success: input.success,
            summary: input.summary,
            tags: input.tags,
            feedback: input.feedback,
        };
        self.store.create_episode(&episode).await?;

        if let Err(e) = self.index_episode(&episode).await {
            tracing::warn!(episode_id = %episode.id, error = %e, "episode stored without embedding");
        }
        tracing::debug!(episode_id = %episode.id, session_id = %episode.session_id, "episode stored");
        Ok(episode)
    }

    /// 用文档库中的全部 episode 重建向量索引，返回写入成功的条数
    pub async fn reindex(&self) -> AgentResult<usize> {
        let episodes = self.store.list_episodes(&EpisodeFilter::default()).await?;
        let mut indexed = 0;
        for episode in &episodes {
            match self.index_episode(episode).await {
                Ok(()) => indexed += 1,
                Err(e) => tracing::warn!(episode_id = %episode.id, error = %e, "episode not reindexed"),
            }
        }
        Ok(indexed)
    }

    async fn index_episode(&self, episode: &Episode) -> AgentResult<()> {
        let vector = self
            .embedder
            .embed(&episode.summary, EmbeddingKind::Document)
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?;
        let mut metadata = Metadata::new();
        metadata.insert("session_id".to_string(), json!(episode.session_id));
        metadata.insert("topic".to_string(), json!(episode.topic));
        metadata.insert("timestamp".to_string(), json!(episode.timestamp.to_rfc3339()));
        metadata.insert("success".to_string(), json!(episode.success));
        self.index
            .upsert(
                EPISODES_NAMESPACE,
                &episode.id,
                vector,
                metadata,
                &episode.summary,
            )
            .await
    }

    pub async fn get(&self, id: &str) -> AgentResult<Option<Episode>> {
        Ok(self.store.get_episode(id).await?)
    }

    /// 最近的 episode（新的在前）
    pub async fn recent(&self, session_id: Option<&str>, limit: usize) -> AgentResult<Vec<Episode>> {
        let filter = EpisodeFilter {
            session_id: session_id.map(str::to_string),
            limit: Some(limit),
            ..EpisodeFilter::default()
        };
        Ok(self.store.list_episodes(&filter).await?)
    }

    pub async fn search_similar(
        &self,
        query: &str,
        opts: &EpisodeSearchOptions,
    ) -> AgentResult<Vec<(Episode, f32)>> {
        let vector = self
            .embedder
            .embed(query, EmbeddingKind::Query)
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?;

        let mut vq = VectorQuery::new(opts.limit).with_min_score(opts.min_score);
        if let Some(session_id) = &opts.session_id {
            vq = vq.with_filter("session_id", session_id.as_str());
        }
        if let Some(topic) = &opts.topic {
            vq = vq.with_filter("topic", topic.as_str());
        }
        let matches = self
            .index
            .search_by_vector(EPISODES_NAMESPACE, &vector, &vq)
            .await?;

        let mut out = Vec::with_capacity(matches.len());
        for m in matches {
            // 索引里有、文档库里没有的 id 直接跳过
            if let Some(episode) = self.store.get_episode(&m.id).await? {
                out.push((episode, m.score));
            }
        }
        Ok(out)
    }

    /// 与已存 episode 相似的其他 episode；id 不存在时返回 UnknownEpisode
    pub async fn similar_to(
        &self,
        id: &str,
        opts: &EpisodeSearchOptions,
    ) -> AgentResult<Vec<(Episode, f32)>> {
        let episode = self
            .get(id)
            .await?
            .ok_or_else(|| AgentError::UnknownEpisode(id.to_string()))?;
        let search = EpisodeSearchOptions {
            limit: opts.limit + 1,
            ..opts.clone()
        };
        let mut hits = self.search_similar(&episode.summary, &search).await?;
        hits.retain(|(e, _)| e.id != episode.id);
        hits.truncate(opts.limit);
        Ok(hits)
    }

    /// 检索候选、按 0.7·名次 + 0.3·新近度打分，在 max_tokens 内贪心填充，结果按时间升序
    pub async fn build_context(
        &self,
        query: &str,
        max_tokens: usize,
        opts: &EpisodeSearchOptions,
    ) -> AgentResult<EpisodicContext> {
        let search = EpisodeSearchOptions {
            limit: self.candidate_limit,
            ..opts.clone()
        };
        let hits = self.search_similar(query, &search).await?;
        let total = hits.len();
        let now = Utc::now();

        let mut scored: Vec<(f64, Episode)> = hits
            .into_iter()
            .enumerate()
            .map(|(i, (episode, _))| {
                let score = episode_score(relevance_rank(i, total), episode.age_days(now));
                (score, episode)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let selection = greedy_fill(
            scored.into_iter().map(|(_, e)| e).collect(),
            max_tokens,
            |selected: &[Episode]| join_rendered(selected, "\n\n", Episode::render),
        );
        let mut episodes = selection.selected;
        episodes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        tracing::debug!(
            candidates = total,
            selected = episodes.len(),
            tokens = selection.used_tokens,
            "episodic context built"
        );

        // 按时间重排不改变字符构成，估算值与 selection 一致
        let text = join_rendered(&episodes, "\n\n", Episode::render);
        Ok(EpisodicContext {
            episodes,
            text,
            estimated_tokens: selection.used_tokens,
            truncated: selection.truncated,
        })
    }

    /// 把早于 age_days 的 episode 按会话分组，足够大的组交给 consolidator；原记录不动
    pub async fn consolidate(&self, policy: ConsolidationPolicy) -> AgentResult<EpisodeConsolidation> {
        let cutoff = Utc::now() - chrono::Duration::days(policy.age_days);
        let old = self
            .store
            .list_episodes(&EpisodeFilter {
                until: Some(cutoff),
                ..EpisodeFilter::default()
            })
            .await?;

        let mut groups: BTreeMap<String, Vec<Episode>> = BTreeMap::new();
        for episode in old {
            if episode.tags.iter().any(|t| t == CONSOLIDATED_TAG) {
                continue;
            }
            groups
                .entry(episode.session_id.clone())
                .or_default()
                .push(episode);
        }

        let mut report = EpisodeConsolidation::default();
        for (session_id, mut episodes) in groups {
            if episodes.len() < policy.min_group {
                continue;
            }
            report.groups_considered += 1;
            episodes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            match self.consolidator.consolidate(&session_id, &episodes).await {
                Ok(Some(mut input)) => {
                    if !input.tags.iter().any(|t| t == CONSOLIDATED_TAG) {
                        input.tags.push(CONSOLIDATED_TAG.to_string());
                    }
                    let stored = self.store(input).await?;
                    report.created.push(stored.id);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "episode consolidation skipped");
                }
            }
        }
        if !report.created.is_empty() {
            tracing::info!(created = report.created.len(), "episodes consolidated");
        }
        Ok(report)
    }

    pub async fn count(&self) -> AgentResult<usize> {
        Ok(self.store.count_episodes().await?)
    }

    /// 健康检查：文档库与索引都可访问
    pub async fn probe(&self) -> AgentResult<()> {
        self.store.count_episodes().await?;
        self.index.count(EPISODES_NAMESPACE).await?;
        Ok(())
    }
}
