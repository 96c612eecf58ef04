//! 程序记忆：可复用的研究策略、使用统计与推荐
//!
//! 策略名唯一；同名写入视为对已有策略的补充说明（追加 refinement）。
//! 每条策略记下归纳它的 episode，同一批 episode 不会被重复归纳。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::core::error::{AgentError, AgentResult};
use crate::llm::{
    schema_hint, CompletionOptions, CompletionService, EmbeddingKind, EmbeddingService,
    ParsedOutput, Validate,
};
use crate::memory::scoring::{running_average, strategy_score};
use crate::memory::store::{DocumentStore, StrategyFilter};
use crate::memory::types::{days_between, dedup_preserving, Episode, Strategy, StrategyInput};
use crate::memory::vector::{Metadata, VectorIndex, VectorQuery, STRATEGIES_NAMESPACE};
use crate::memory::Message;

const RECOMMEND_CANDIDATES: usize = 20;

#[derive(Debug, Clone)]
pub struct StrategyRecommendation {
    pub strategy: Strategy,
    pub score: f64,
    pub missing_tools: Vec<String>,
    pub reasoning: String,
}

/// 从成功 episode 归纳策略时 LLM 的输出
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ExtractedStrategy {
    /// 简短且唯一的策略名
    strategy_name: String,
    description: String,
    #[serde(default)]
    applicable_contexts: Vec<String>,
    #[serde(default)]
    required_tools: Vec<String>,
}

impl Validate for ExtractedStrategy {
    fn validate(mut self) -> Result<Self, String> {
        self.strategy_name = self.strategy_name.validate()?;
        self.description = self.description.validate()?;
        self.applicable_contexts = dedup_preserving(
            self.applicable_contexts
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        );
        self.required_tools = dedup_preserving(
            self.required_tools
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        );
        Ok(self)
    }
}

fn recommendation_reasoning(strategy: &Strategy, missing: &[String]) -> String {
    let mut parts = vec![format!(
        "{:.0}% success over {} uses",
        strategy.success_rate * 100.0,
        strategy.times_used
    )];
    if strategy.times_used == 0 {
        parts[0] = "untested strategy".to_string();
    }
    if missing.is_empty() {
        parts.push("all required tools available".to_string());
    } else {
        parts.push(format!("missing tools: {}", missing.join(", ")));
    }
    if let Some(last) = strategy.last_used {
        parts.push(format!("last used {}", last.format("%Y-%m-%d")));
    }
    parts.join("; ")
}

pub struct ProceduralManager {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingService>,
    llm: Arc<dyn CompletionService>,
}

impl ProceduralManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
        llm: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            llm,
        }
    }

    pub async fn store_strategy(&self, input: StrategyInput) -> AgentResult<Strategy> {
        let name = input.strategy_name.trim().to_string();
        if let Some(existing) = self.store.get_strategy_by_name(&name).await? {
            tracing::debug!(strategy = %name, "strategy exists, recording refinement");
            return self.refine_strategy(&existing.id, &input.description).await;
        }

        let strategy = Strategy {
            id: uuid::Uuid::new_v4().to_string(),
            strategy_name: name,
            description: input.description,
            applicable_contexts: input.applicable_contexts,
            required_tools: input.required_tools,
            success_rate: input.success_rate.clamp(0.0, 1.0),
            average_duration_ms: input.average_duration_ms.max(0.0),
            times_used: input.times_used,
            refinements: Vec::new(),
            created_at: Utc::now(),
            last_used: None,
            last_refined: None,
            source_episodes: Vec::new(),
        };
        self.store.create_strategy(&strategy).await?;

        if let Err(e) = self.index_strategy(&strategy).await {
            tracing::warn!(strategy_id = %strategy.id, error = %e, "strategy stored without embedding");
        }
        tracing::info!(strategy = %strategy.strategy_name, "strategy stored");
        Ok(strategy)
    }

    async fn index_strategy(&self, strategy: &Strategy) -> AgentResult<()> {
        let text = strategy.embedding_text();
        let vector = self
            .embedder
            .embed(&text, EmbeddingKind::Document)
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?;
        let mut metadata = Metadata::new();
        metadata.insert("name".to_string(), json!(strategy.strategy_name));
        self.index
            .upsert(STRATEGIES_NAMESPACE, &strategy.id, vector, metadata, &text)
            .await
    }

    /// 用文档库中的全部策略重建向量索引，返回写入成功的条数
    pub async fn reindex(&self) -> AgentResult<usize> {
        let strategies = self.store.list_strategies(&StrategyFilter::default()).await?;
        let mut indexed = 0;
        for strategy in &strategies {
            match self.index_strategy(strategy).await {
                Ok(()) => indexed += 1,
                Err(e) => tracing::warn!(strategy_id = %strategy.id, error = %e, "strategy not reindexed"),
            }
        }
        Ok(indexed)
    }

    async fn learned_episode_ids(&self) -> AgentResult<HashSet<String>> {
        let strategies = self.store.list_strategies(&StrategyFilter::default()).await?;
        Ok(strategies
            .into_iter()
            .flat_map(|s| s.source_episodes)
            .collect())
    }

    pub async fn get(&self, id: &str) -> AgentResult<Option<Strategy>> {
        Ok(self.store.get_strategy(id).await?)
    }

    pub async fn get_by_name(&self, name: &str) -> AgentResult<Option<Strategy>> {
        Ok(self.store.get_strategy_by_name(name).await?)
    }

    pub async fn list(&self, limit: usize) -> AgentResult<Vec<Strategy>> {
        let filter = StrategyFilter {
            limit: Some(limit),
            ..StrategyFilter::default()
        };
        Ok(self.store.list_strategies(&filter).await?)
    }

    async fn require(&self, id: &str) -> AgentResult<Strategy> {
        self.store
            .get_strategy(id)
            .await?
            .ok_or_else(|| AgentError::UnknownStrategy(id.to_string()))
    }

    /// 按语境相似度取候选，再按成功率/经验/工具可用性/新近度排序
    pub async fn recommend_strategies(
        &self,
        context: &str,
        available_tools: &[String],
        k: usize,
    ) -> AgentResult<Vec<StrategyRecommendation>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = match self.embedder.embed(context, EmbeddingKind::Query).await {
            Ok(vector) => {
                let vq = VectorQuery::new(RECOMMEND_CANDIDATES.max(k));
                let matches = self
                    .index
                    .search_by_vector(STRATEGIES_NAMESPACE, &vector, &vq)
                    .await?;
                let mut out = Vec::with_capacity(matches.len());
                for m in matches {
                    if let Some(s) = self.store.get_strategy(&m.id).await? {
                        out.push(s);
                    }
                }
                out
            }
            Err(e) => {
                tracing::warn!(error = %e, "strategy search unavailable, ranking recent strategies");
                self.list(RECOMMEND_CANDIDATES.max(k)).await?
            }
        };

        let now = Utc::now();
        let mut recs: Vec<StrategyRecommendation> = candidates
            .into_iter()
            .map(|strategy| {
                let missing = strategy.missing_tools(available_tools);
                let last_use = strategy.last_used.unwrap_or(strategy.created_at);
                let score = strategy_score(
                    strategy.success_rate,
                    strategy.times_used,
                    missing.len(),
                    days_between(last_use, now),
                );
                StrategyRecommendation {
                    reasoning: recommendation_reasoning(&strategy, &missing),
                    strategy,
                    score,
                    missing_tools: missing,
                }
            })
            .collect();
        recs.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        recs.truncate(k);
        Ok(recs)
    }

    /// 以增量均值更新成功率与平均耗时
    pub async fn record_strategy_use(
        &self,
        id: &str,
        success: bool,
        duration_ms: u64,
    ) -> AgentResult<Strategy> {
        let mut s = self.require(id).await?;
        let n = s.times_used;
        s.success_rate = running_average(s.success_rate, n, if success { 1.0 } else { 0.0 });
        s.average_duration_ms = running_average(s.average_duration_ms, n, duration_ms as f64);
        s.times_used = n + 1;
        s.last_used = Some(Utc::now());
        self.store.update_strategy(&s).await?;
        tracing::debug!(strategy = %s.strategy_name, success_rate = s.success_rate, "strategy use recorded");
        Ok(s)
    }

    pub async fn refine_strategy(&self, id: &str, refinement: &str) -> AgentResult<Strategy> {
        let mut s = self.require(id).await?;
        let refinement = refinement.trim();
        if !refinement.is_empty() {
            s.refinements.push(refinement.to_string());
            s.last_refined = Some(Utc::now());
            self.store.update_strategy(&s).await?;
        }
        Ok(s)
    }

    /// 从尚未归纳过的成功 episode 归纳一条策略；没有这样的样本或 LLM 输出不可用时返回 None
    pub async fn extract_strategy_from_episodes(
        &self,
        episodes: &[Episode],
    ) -> AgentResult<Option<Strategy>> {
        let learned = self.learned_episode_ids().await?;
        let successes: Vec<&Episode> = episodes
            .iter()
            .filter(|e| e.success && !learned.contains(&e.id))
            .collect();
        if successes.is_empty() {
            return Ok(None);
        }

        let listing = successes
            .iter()
            .map(|e| {
                let tools = dedup_preserving(e.actions.iter().map(|a| a.tool.clone()));
                format!("- {} | tools: {}", e.render(), tools.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "These research episodes succeeded. Describe the reusable strategy behind them.\n\n{}\n\n\
             Reply with JSON matching this schema:\n{}",
            listing,
            schema_hint::<ExtractedStrategy>()
        );
        let options = CompletionOptions::new().with_temperature(0.2);
        let extracted = match self.llm.complete(&[Message::user(prompt)], &options).await {
            Ok(resp) => resp.parse::<ExtractedStrategy>(),
            Err(e) => ParsedOutput::ParseError(e.to_string()),
        };
        let extracted = match extracted {
            ParsedOutput::Ok(x) => x,
            ParsedOutput::ParseError(e) => {
                tracing::warn!(error = %e, "strategy extraction produced nothing usable");
                return Ok(None);
            }
        };

        let count = successes.len();
        let mean_duration =
            successes.iter().map(|e| e.duration_ms as f64).sum::<f64>() / count as f64;
        let input = StrategyInput {
            strategy_name: extracted.strategy_name,
            description: extracted.description,
            applicable_contexts: extracted.applicable_contexts,
            required_tools: extracted.required_tools,
            success_rate: 1.0,
            average_duration_ms: mean_duration,
            times_used: count as u32,
        };
        let mut strategy = self.store_strategy(input).await?;
        let mut sources = std::mem::take(&mut strategy.source_episodes);
        sources.extend(successes.iter().map(|e| e.id.clone()));
        strategy.source_episodes = dedup_preserving(sources);
        self.store.update_strategy(&strategy).await?;
        tracing::debug!(
            strategy = %strategy.strategy_name,
            episodes = count,
            "strategy extracted from episodes"
        );
        Ok(Some(strategy))
    }

    pub async fn count(&self) -> AgentResult<usize> {
        Ok(self.store.count_strategies().await?)
    }

    pub async fn probe(&self) -> AgentResult<()> {
        self.store.count_strategies().await?;
        self.index.count(STRATEGIES_NAMESPACE).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockCompletion, MockEmbedder};
    use crate::memory::store::InMemoryDocumentStore;
    use crate::memory::types::EpisodeInput;
    use crate::memory::vector::InMemoryVectorIndex;

    fn manager(llm: MockCompletion) -> ProceduralManager {
        ProceduralManager::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(MockEmbedder::new()),
            Arc::new(llm),
        )
    }

    fn episode(success: bool, duration_ms: u64) -> Episode {
        let input = EpisodeInput::new("s1", "rust async", "surveyed runtimes");
        Episode {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: input.session_id,
            timestamp: Utc::now(),
            topic: input.topic,
            actions: vec![],
            outcomes: vec![],
            findings: vec![],
            duration_ms,
            success,
            summary: input.summary,
            tags: vec![],
            feedback: None,
        }
    }

    #[tokio::test]
    async fn test_same_name_becomes_refinement() {
        let m = manager(MockCompletion::failing());
        let first = m
            .store_strategy(StrategyInput::new("survey-first", "list sources then read"))
            .await
            .unwrap();
        let second = m
            .store_strategy(StrategyInput::new("survey-first", "prefer primary sources"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.refinements, vec!["prefer primary sources"]);
        assert!(second.last_refined.is_some());
        assert_eq!(m.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_use_running_average() {
        let m = manager(MockCompletion::failing());
        let s = m
            .store_strategy(StrategyInput::new("s", "d"))
            .await
            .unwrap();
        m.record_strategy_use(&s.id, true, 100).await.unwrap();
        m.record_strategy_use(&s.id, false, 300).await.unwrap();
        let s = m.record_strategy_use(&s.id, true, 200).await.unwrap();
        assert_eq!(s.times_used, 3);
        assert!((s.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((s.average_duration_ms - 200.0).abs() < 1e-9);
        assert!(s.last_used.is_some());
    }

    #[tokio::test]
    async fn test_unknown_strategy_propagates() {
        let m = manager(MockCompletion::failing());
        let err = m.record_strategy_use("missing", true, 1).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownStrategy(_)));
        assert!(m.refine_strategy("missing", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_recommend_prefers_available_tools() {
        let m = manager(MockCompletion::failing());
        let mut a = StrategyInput::new("web-survey", "search the web for research papers");
        a.required_tools = vec!["web_search".into()];
        a.success_rate = 0.8;
        let mut b = StrategyInput::new("pdf-deep-read", "read research papers in depth");
        b.required_tools = vec!["pdf_reader".into(), "web_search".into()];
        b.success_rate = 0.8;
        m.store_strategy(a).await.unwrap();
        m.store_strategy(b).await.unwrap();

        let recs = m
            .recommend_strategies("research papers", &["web_search".to_string()], 2)
            .await
            .unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].strategy.strategy_name, "web-survey");
        assert_eq!(recs[1].missing_tools, vec!["pdf_reader"]);
        assert!(recs[1].reasoning.contains("missing tools: pdf_reader"));
    }

    #[tokio::test]
    async fn test_extract_strategy_from_successes() {
        let reply = r#"{"strategyName": "runtime-survey", "description": "compare runtimes by benchmark",
                        "applicableContexts": ["rust async"], "requiredTools": ["web_search"]}"#;
        let m = manager(MockCompletion::with_responses([reply]));
        let s = m
            .extract_strategy_from_episodes(&[episode(true, 100), episode(false, 999), episode(true, 300)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s.strategy_name, "runtime-survey");
        assert_eq!(s.success_rate, 1.0);
        assert_eq!(s.times_used, 2);
        assert!((s.average_duration_ms - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_extract_strategy_skips_learned_episodes() {
        let reply = r#"{"strategyName": "runtime-survey", "description": "compare runtimes by benchmark"}"#;
        let llm = Arc::new(MockCompletion::from_fn(move |_| Ok(reply.to_string())));
        let m = ProceduralManager::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(MockEmbedder::new()),
            llm.clone(),
        );
        let batch = vec![episode(true, 100), episode(true, 300)];

        let first = m.extract_strategy_from_episodes(&batch).await.unwrap().unwrap();
        assert_eq!(first.source_episodes.len(), 2);
        assert!(m.extract_strategy_from_episodes(&batch).await.unwrap().is_none());
        assert_eq!(llm.call_count(), 1);

        let mut grown = batch.clone();
        grown.push(episode(true, 200));
        let again = m.extract_strategy_from_episodes(&grown).await.unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.refinements.len(), 1);
        assert_eq!(again.source_episodes.len(), 3);
        assert_eq!(m.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_extract_strategy_degrades_to_none() {
        let m = manager(MockCompletion::with_responses(["I cannot help with that"]));
        assert!(m
            .extract_strategy_from_episodes(&[episode(true, 1)])
            .await
            .unwrap()
            .is_none());

        let m = manager(MockCompletion::failing());
        assert!(m
            .extract_strategy_from_episodes(&[episode(false, 1)])
            .await
            .unwrap()
            .is_none());
    }
}
