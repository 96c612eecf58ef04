//! 文档存储：会话、episode、fact、strategy 的类型化 CRUD
//!
//! DocumentStore 为异步 trait；InMemoryDocumentStore 以 id 为键的表（arena）保存记录，
//! fact 之间的关联只存 id，合并/删除不需要图遍历。SQLite 实现见 sqlite.rs。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::session::{Session, SessionStatus};
use crate::memory::types::{Episode, Fact, Strategy};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Duplicate record: {kind} {id}")]
    Duplicate { kind: &'static str, id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// 会话列表过滤（结果按创建时间倒序）
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub topic: Option<String>,
    pub parent_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    pub fn matches(&self, s: &Session) -> bool {
        self.status.map_or(true, |st| s.status == st)
            && self.topic.as_ref().map_or(true, |t| &s.topic == t)
            && self
                .parent_id
                .as_ref()
                .map_or(true, |p| s.parent_id.as_ref() == Some(p))
            && self.created_after.map_or(true, |t| s.created_at >= t)
            && self.created_before.map_or(true, |t| s.created_at <= t)
    }
}

/// episode 列表过滤（结果按时间倒序）
#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    pub session_id: Option<String>,
    pub topic: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
}

impl EpisodeFilter {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, e: &Episode) -> bool {
        self.session_id.as_ref().map_or(true, |s| &e.session_id == s)
            && self.topic.as_ref().map_or(true, |t| &e.topic == t)
            && self.since.map_or(true, |t| e.timestamp >= t)
            && self.until.map_or(true, |t| e.timestamp <= t)
            && self.success.map_or(true, |ok| e.success == ok)
    }
}

/// fact 列表过滤（结果按创建时间倒序）；tags 为「任一命中」
#[derive(Debug, Clone, Default)]
pub struct FactFilter {
    pub category: Option<String>,
    pub min_confidence: Option<f64>,
    pub min_relevance: Option<f64>,
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

impl FactFilter {
    pub fn matches(&self, f: &Fact) -> bool {
        self.category.as_ref().map_or(true, |c| &f.category == c)
            && self.min_confidence.map_or(true, |m| f.confidence >= m)
            && self.min_relevance.map_or(true, |m| f.relevance >= m)
            && (self.tags.is_empty() || self.tags.iter().any(|t| f.tags.contains(t)))
    }
}

/// strategy 列表过滤（结果按创建时间倒序）
#[derive(Debug, Clone, Default)]
pub struct StrategyFilter {
    pub min_success_rate: Option<f64>,
    pub limit: Option<usize>,
}

impl StrategyFilter {
    pub fn matches(&self, s: &Strategy) -> bool {
        self.min_success_rate.map_or(true, |m| s.success_rate >= m)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;
    async fn update_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError>;

    async fn create_episode(&self, episode: &Episode) -> Result<(), StoreError>;
    async fn get_episode(&self, id: &str) -> Result<Option<Episode>, StoreError>;
    async fn list_episodes(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>, StoreError>;

    async fn create_fact(&self, fact: &Fact) -> Result<(), StoreError>;
    async fn get_fact(&self, id: &str) -> Result<Option<Fact>, StoreError>;
    async fn update_fact(&self, fact: &Fact) -> Result<(), StoreError>;
    async fn list_facts(&self, filter: &FactFilter) -> Result<Vec<Fact>, StoreError>;

    async fn create_strategy(&self, strategy: &Strategy) -> Result<(), StoreError>;
    async fn get_strategy(&self, id: &str) -> Result<Option<Strategy>, StoreError>;
    async fn get_strategy_by_name(&self, name: &str) -> Result<Option<Strategy>, StoreError>;
    async fn update_strategy(&self, strategy: &Strategy) -> Result<(), StoreError>;
    async fn list_strategies(&self, filter: &StrategyFilter) -> Result<Vec<Strategy>, StoreError>;

    async fn count_episodes(&self) -> Result<usize, StoreError> {
        Ok(self.list_episodes(&EpisodeFilter::default()).await?.len())
    }

    async fn count_facts(&self) -> Result<usize, StoreError> {
        Ok(self.list_facts(&FactFilter::default()).await?.len())
    }

    async fn count_strategies(&self) -> Result<usize, StoreError> {
        Ok(self.list_strategies(&StrategyFilter::default()).await?.len())
    }
}

fn take_limit<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(n) = limit {
        items.truncate(n);
    }
    items
}

/// 内存实现：每类记录一张 id → 记录 的表
#[derive(Default)]
pub struct InMemoryDocumentStore {
    sessions: RwLock<HashMap<String, Session>>,
    episodes: RwLock<HashMap<String, Episode>>,
    facts: RwLock<HashMap<String, Fact>>,
    strategies: RwLock<HashMap<String, Strategy>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn insert_new<T: Clone>(
    table: &RwLock<HashMap<String, T>>,
    kind: &'static str,
    id: &str,
    record: &T,
) -> Result<(), StoreError> {
    let mut table = table.write().await;
    if table.contains_key(id) {
        return Err(StoreError::Duplicate {
            kind,
            id: id.to_string(),
        });
    }
    table.insert(id.to_string(), record.clone());
    Ok(())
}

async fn replace_existing<T: Clone>(
    table: &RwLock<HashMap<String, T>>,
    kind: &'static str,
    id: &str,
    record: &T,
) -> Result<(), StoreError> {
    let mut table = table.write().await;
    match table.get_mut(id) {
        Some(slot) => {
            *slot = record.clone();
            Ok(())
        }
        None => Err(StoreError::NotFound {
            kind,
            id: id.to_string(),
        }),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        insert_new(&self.sessions, "session", &session.id, session).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        replace_existing(&self.sessions, "session", &session.id, session).await
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        let mut items: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(take_limit(items, filter.limit))
    }

    async fn create_episode(&self, episode: &Episode) -> Result<(), StoreError> {
        insert_new(&self.episodes, "episode", &episode.id, episode).await
    }

    async fn get_episode(&self, id: &str) -> Result<Option<Episode>, StoreError> {
        Ok(self.episodes.read().await.get(id).cloned())
    }

    async fn list_episodes(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>, StoreError> {
        let mut items: Vec<Episode> = self
            .episodes
            .read()
            .await
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(take_limit(items, filter.limit))
    }

    async fn create_fact(&self, fact: &Fact) -> Result<(), StoreError> {
        insert_new(&self.facts, "fact", &fact.id, fact).await
    }

    async fn get_fact(&self, id: &str) -> Result<Option<Fact>, StoreError> {
        Ok(self.facts.read().await.get(id).cloned())
    }

    async fn update_fact(&self, fact: &Fact) -> Result<(), StoreError> {
        replace_existing(&self.facts, "fact", &fact.id, fact).await
    }

    async fn list_facts(&self, filter: &FactFilter) -> Result<Vec<Fact>, StoreError> {
        let mut items: Vec<Fact> = self
            .facts
            .read()
            .await
            .values()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(take_limit(items, filter.limit))
    }

    async fn create_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        let mut table = self.strategies.write().await;
        if table.contains_key(&strategy.id)
            || table
                .values()
                .any(|s| s.strategy_name == strategy.strategy_name)
        {
            return Err(StoreError::Duplicate {
                kind: "strategy",
                id: strategy.strategy_name.clone(),
            });
        }
        table.insert(strategy.id.clone(), strategy.clone());
        Ok(())
    }

    async fn get_strategy(&self, id: &str) -> Result<Option<Strategy>, StoreError> {
        Ok(self.strategies.read().await.get(id).cloned())
    }

    async fn get_strategy_by_name(&self, name: &str) -> Result<Option<Strategy>, StoreError> {
        Ok(self
            .strategies
            .read()
            .await
            .values()
            .find(|s| s.strategy_name == name)
            .cloned())
    }

    async fn update_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        replace_existing(&self.strategies, "strategy", &strategy.id, strategy).await
    }

    async fn list_strategies(&self, filter: &StrategyFilter) -> Result<Vec<Strategy>, StoreError> {
        let mut items: Vec<Strategy> = self
            .strategies
            .read()
            .await
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(take_limit(items, filter.limit))
    }

    async fn count_episodes(&self) -> Result<usize, StoreError> {
        Ok(self.episodes.read().await.len())
    }

    async fn count_facts(&self) -> Result<usize, StoreError> {
        Ok(self.facts.read().await.len())
    }

    async fn count_strategies(&self) -> Result<usize, StoreError> {
        Ok(self.strategies.read().await.len())
    }
}
