//! 记忆系统：协调情景 / 语义 / 程序三类记忆
//!
//! - build_context：按预算比例并发检索三类记忆，任一类失败时该部分为空
//! - store_experience：要求活跃会话，写入 episode 并尽力抽取事实，累加行动计数
//! - consolidate / maintenance / health：各类独立执行，错误汇总进报告

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::config::{AppConfig, MemorySection};
use crate::core::error::AgentResult;
use crate::core::session::SessionManager;
use crate::llm::{CompletionService, EmbeddingService, OpenAiCompletion, OpenAiEmbedder};
use crate::memory::episodic::{
    ConsolidationPolicy, EpisodeConsolidation, EpisodeConsolidator, EpisodeSearchOptions,
    EpisodicContext, EpisodicManager,
};
use crate::memory::procedural::{ProceduralManager, StrategyRecommendation};
use crate::memory::semantic::{FactConsolidation, FactSearchOptions, KnowledgeContext, SemanticManager};
use crate::memory::sqlite::SqliteDocumentStore;
use crate::memory::store::{DocumentStore, InMemoryDocumentStore};
use crate::memory::token_budget::{greedy_fill, join_rendered, BudgetSplit};
use crate::memory::types::{Episode, EpisodeInput, Fact, Strategy};
use crate::memory::vector::{InMemoryVectorIndex, VectorIndex};
use crate::memory::working::truncate_chars;

const DEFAULT_STRATEGY_LIMIT: usize = 5;
const STRATEGY_EXTRACTION_WINDOW: usize = 20;

/// 构建上下文的参数
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub max_tokens: usize,
    pub split: BudgetSplit,
    pub session_id: Option<String>,
    pub category: Option<String>,
    pub available_tools: Vec<String>,
    pub strategy_limit: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self::from_config(&MemorySection::default())
    }
}

impl ContextOptions {
    pub fn from_config(config: &MemorySection) -> Self {
        Self {
            max_tokens: config.context_max_tokens,
            split: BudgetSplit::from_config(config),
            session_id: None,
            category: None,
            available_tools: Vec::new(),
            strategy_limit: DEFAULT_STRATEGY_LIMIT,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.available_tools = tools;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProceduralContext {
    pub recommendations: Vec<StrategyRecommendation>,
    pub text: String,
    pub estimated_tokens: usize,
    pub truncated: bool,
}

fn render_recommendation(r: &StrategyRecommendation) -> String {
    format!(
        "- {}: {} (score {:.2}; {})",
        r.strategy.strategy_name, r.strategy.description, r.score, r.reasoning
    )
}

/// 三类记忆合并后的检索上下文
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub query: String,
    pub episodic: EpisodicContext,
    pub semantic: KnowledgeContext,
    pub procedural: ProceduralContext,
    /// 检索失败、以空结果代替的记忆类别
    pub degraded: Vec<&'static str>,
}

impl MemoryContext {
    pub fn estimated_tokens(&self) -> usize {
        self.episodic.estimated_tokens
            + self.semantic.estimated_tokens
            + self.procedural.estimated_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.episodic.episodes.is_empty()
            && self.semantic.facts.is_empty()
            && self.procedural.recommendations.is_empty()
    }

    /// 拼成供 prompt 使用的分节文本；空的部分省略
    pub fn render(&self) -> String {
        let mut sections = Vec::new();
        if !self.semantic.text.is_empty() {
            sections.push(format!("## Known facts\n{}", self.semantic.text));
        }
        if !self.episodic.text.is_empty() {
            sections.push(format!("## Past episodes\n{}", self.episodic.text));
        }
        if !self.procedural.text.is_empty() {
            sections.push(format!("## Suggested strategies\n{}", self.procedural.text));
        }
        sections.join("\n\n")
    }

    /// 至多 n 条单行记忆，按 fact / episode / strategy 轮流取
    pub fn top_items(&self, n: usize) -> Vec<String> {
        let facts: Vec<String> = self
            .semantic
            .facts
            .iter()
            .map(|f| format!("fact: {}", f.content))
            .collect();
        // episodes 以时间升序保存，最新的优先
        let episodes: Vec<String> = self
            .episodic
            .episodes
            .iter()
            .rev()
            .map(|e| format!("episode: {} - {}", e.topic, truncate_chars(&e.summary, 120)))
            .collect();
        let strategies: Vec<String> = self
            .procedural
            .recommendations
            .iter()
            .map(|r| format!("strategy: {}", r.strategy.strategy_name))
            .collect();

        let lists = [facts, episodes, strategies];
        let longest = lists.iter().map(Vec::len).max().unwrap_or(0);
        let mut out = Vec::new();
        for i in 0..longest {
            for list in &lists {
                if let Some(item) = list.get(i) {
                    if out.len() == n {
                        return out;
                    }
                    out.push(item.clone());
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct StoredExperience {
    pub episode: Episode,
    pub facts: Vec<Fact>,
    /// 仅为信号，是否反思由调用方决定
    pub should_reflect: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConsolidationReport {
    pub episodes: Option<EpisodeConsolidation>,
    pub facts: Option<FactConsolidation>,
    pub strategy: Option<Strategy>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub facts_decayed: Option<usize>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentHealth {
    Healthy,
    Unhealthy(String),
}

impl ComponentHealth {
    fn from_probe(result: AgentResult<()>) -> Self {
        match result {
            Ok(()) => ComponentHealth::Healthy,
            Err(e) => ComponentHealth::Unhealthy(e.to_string()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ComponentHealth::Healthy)
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub episodic: ComponentHealth,
    pub semantic: ComponentHealth,
    pub procedural: ComponentHealth,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.episodic.is_healthy() && self.semantic.is_healthy() && self.procedural.is_healthy()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub episodes: usize,
    pub facts: usize,
    pub strategies: usize,
}

pub struct MemorySystem {
    sessions: SessionManager,
    episodic: EpisodicManager,
    semantic: SemanticManager,
    procedural: ProceduralManager,
    config: MemorySection,
    /// session_id -> 上次反思后记录的行动数
    action_counters: Mutex<HashMap<String, usize>>,
}

impl MemorySystem {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
        llm: Arc<dyn CompletionService>,
        config: MemorySection,
    ) -> Self {
        let episodic = EpisodicManager::new(store.clone(), index.clone(), embedder.clone())
            .with_candidate_limit(config.candidate_limit);
        let semantic =
            SemanticManager::new(store.clone(), index.clone(), embedder.clone(), llm.clone())
                .with_candidate_limit(config.candidate_limit);
        let procedural = ProceduralManager::new(store.clone(), index, embedder, llm);
        Self {
            sessions: SessionManager::new(store),
            episodic,
            semantic,
            procedural,
            config,
            action_counters: Mutex::new(HashMap::new()),
        }
    }

    /// 按配置组装：OpenAI 兼容的 completion / embedding，SQLite（若配置了路径）或内存文档库。
    /// 使用 SQLite 时向量索引按库中已有记录重建
    pub async fn open(config: &AppConfig) -> AgentResult<Self> {
        config.memory.validate()?;
        let store: Arc<dyn DocumentStore> = match &config.storage.sqlite_path {
            Some(path) => Arc::new(SqliteDocumentStore::open(path)?),
            None => Arc::new(InMemoryDocumentStore::new()),
        };
        let system = Self::new(
            store,
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(OpenAiEmbedder::from_config(&config.embedding)),
            Arc::new(OpenAiCompletion::from_config(&config.llm)),
            config.memory.clone(),
        );
        if config.storage.sqlite_path.is_some() {
            system.rebuild_index().await?;
        }
        tracing::info!(
            model = %config.llm.model,
            embedding_model = %config.embedding.model,
            sqlite = config.storage.sqlite_path.is_some(),
            "memory system opened"
        );
        Ok(system)
    }

    /// 从文档库重新嵌入全部 episode / fact / strategy；返回各类写入索引的条数
    pub async fn rebuild_index(&self) -> AgentResult<MemoryStats> {
        let stats = MemoryStats {
            episodes: self.episodic.reindex().await?,
            facts: self.semantic.reindex().await?,
            strategies: self.procedural.reindex().await?,
        };
        tracing::info!(
            episodes = stats.episodes,
            facts = stats.facts,
            strategies = stats.strategies,
            "vector index rebuilt"
        );
        Ok(stats)
    }

    pub fn with_consolidator(mut self, consolidator: Arc<dyn EpisodeConsolidator>) -> Self {
        self.episodic = self.episodic.with_consolidator(consolidator);
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn episodic(&self) -> &EpisodicManager {
        &self.episodic
    }

    pub fn semantic(&self) -> &SemanticManager {
        &self.semantic
    }

    pub fn procedural(&self) -> &ProceduralManager {
        &self.procedural
    }

    pub fn config(&self) -> &MemorySection {
        &self.config
    }

    pub fn context_options(&self) -> ContextOptions {
        ContextOptions::from_config(&self.config)
    }

    async fn procedural_context(
        &self,
        query: &str,
        max_tokens: usize,
        opts: &ContextOptions,
    ) -> AgentResult<ProceduralContext> {
        let recs = self
            .procedural
            .recommend_strategies(query, &opts.available_tools, opts.strategy_limit)
            .await?;
        let selection = greedy_fill(recs, max_tokens, |selected: &[StrategyRecommendation]| {
            join_rendered(selected, "\n", render_recommendation)
        });
        Ok(ProceduralContext {
            recommendations: selection.selected,
            text: selection.text,
            estimated_tokens: selection.used_tokens,
            truncated: selection.truncated,
        })
    }

    /// 三类检索并发执行，全部完成后返回
    pub async fn build_context(&self, query: &str, opts: &ContextOptions) -> MemoryContext {
        let (episodic_budget, semantic_budget, procedural_budget) =
            opts.split.allocate(opts.max_tokens);

        let episode_opts = EpisodeSearchOptions {
            session_id: opts.session_id.clone(),
            ..EpisodeSearchOptions::default()
        };
        let fact_opts = FactSearchOptions {
            category: opts.category.clone(),
            ..FactSearchOptions::default()
        };

        let (episodic, semantic, procedural) = tokio::join!(
            self.episodic
                .build_context(query, episodic_budget, &episode_opts),
            self.semantic
                .build_knowledge_context(query, semantic_budget, &fact_opts),
            self.procedural_context(query, procedural_budget, opts),
        );

        let mut ctx = MemoryContext {
            query: query.to_string(),
            ..MemoryContext::default()
        };
        match episodic {
            Ok(c) => ctx.episodic = c,
            Err(e) => {
                tracing::warn!(error = %e, "episodic context unavailable");
                ctx.degraded.push("episodic");
            }
        }
        match semantic {
            Ok(c) => ctx.semantic = c,
            Err(e) => {
                tracing::warn!(error = %e, "semantic context unavailable");
                ctx.degraded.push("semantic");
            }
        }
        match procedural {
            Ok(c) => ctx.procedural = c,
            Err(e) => {
                tracing::warn!(error = %e, "procedural context unavailable");
                ctx.degraded.push("procedural");
            }
        }
        tracing::debug!(
            tokens = ctx.estimated_tokens(),
            budget = opts.max_tokens,
            "memory context built"
        );
        ctx
    }

    /// 记录一次经验：写 episode，尽力抽取事实，行动计数 +1
    pub async fn store_experience(
        &self,
        session_id: &str,
        mut input: EpisodeInput,
    ) -> AgentResult<StoredExperience> {
        self.sessions.require_active(session_id).await?;
        input.session_id = session_id.to_string();

        let episode = self.episodic.store(input).await?;

        let mut facts = Vec::new();
        if self.config.extract_facts {
            let mut text = episode.summary.clone();
            for finding in &episode.findings {
                text.push('\n');
                text.push_str(finding);
            }
            let inputs = self
                .semantic
                .extract_facts(&text, &format!("episode:{}", episode.id))
                .await;
            if !inputs.is_empty() {
                match self.semantic.store_facts(inputs).await {
                    Ok(stored) => facts = stored,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "extracted facts not stored")
                    }
                }
            }
        }

        let count = self.bump_action_count(session_id);
        let should_reflect = count >= self.config.reflection_interval;
        tracing::info!(
            session_id = %session_id,
            episode_id = %episode.id,
            facts = facts.len(),
            actions_since_reflection = count,
            "experience stored"
        );
        Ok(StoredExperience {
            episode,
            facts,
            should_reflect,
        })
    }

    fn bump_action_count(&self, session_id: &str) -> usize {
        let mut counters = match self.action_counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = counters.entry(session_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn actions_since_reflection(&self, session_id: &str) -> usize {
        match self.action_counters.lock() {
            Ok(counters) => counters.get(session_id).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(session_id).copied().unwrap_or(0),
        }
    }

    /// 只清零该会话的计数
    pub fn mark_reflected(&self, session_id: &str) {
        let mut counters = match self.action_counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters.remove(session_id);
    }

    /// 合并旧 episode、去重事实、从近期成功经验归纳策略；各步骤互不影响
    pub async fn consolidate_memories(&self) -> ConsolidationReport {
        let mut report = ConsolidationReport::default();

        match self
            .episodic
            .consolidate(ConsolidationPolicy::from_config(&self.config))
            .await
        {
            Ok(r) => report.episodes = Some(r),
            Err(e) => report.errors.push(format!("episodic: {e}")),
        }

        match self
            .semantic
            .consolidate_facts(self.config.similarity_threshold)
            .await
        {
            Ok(r) => report.facts = Some(r),
            Err(e) => report.errors.push(format!("semantic: {e}")),
        }

        match self.episodic.recent(None, STRATEGY_EXTRACTION_WINDOW).await {
            Ok(episodes) => match self.procedural.extract_strategy_from_episodes(&episodes).await {
                Ok(s) => report.strategy = s,
                Err(e) => report.errors.push(format!("procedural: {e}")),
            },
            Err(e) => report.errors.push(format!("procedural: {e}")),
        }

        if !report.errors.is_empty() {
            tracing::warn!(errors = ?report.errors, "memory consolidation finished with errors");
        } else {
            tracing::info!("memory consolidation finished");
        }
        report
    }

    /// 周期维护：事实相关度衰减
    pub async fn perform_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        match self.semantic.update_fact_relevance(Utc::now()).await {
            Ok(n) => report.facts_decayed = Some(n),
            Err(e) => report.errors.push(format!("semantic: {e}")),
        }
        report
    }

    pub async fn health_check(&self) -> HealthReport {
        let (episodic, semantic, procedural) = tokio::join!(
            self.episodic.probe(),
            self.semantic.probe(),
            self.procedural.probe(),
        );
        HealthReport {
            episodic: ComponentHealth::from_probe(episodic),
            semantic: ComponentHealth::from_probe(semantic),
            procedural: ComponentHealth::from_probe(procedural),
        }
    }

    pub async fn stats(&self) -> AgentResult<MemoryStats> {
        Ok(MemoryStats {
            episodes: self.episodic.count().await?,
            facts: self.semantic.count().await?,
            strategies: self.procedural.count().await?,
        })
    }
}
