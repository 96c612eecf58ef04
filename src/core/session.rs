//! 研究会话：生命周期与状态持久化
//!
//! 没有全局「当前会话」：调用方持有 session id，显式传给每个操作。
//! 状态迁移：Active ↔ Paused；Active / Paused → Completed / Failed / Cancelled；终态不可再迁移。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{AgentError, AgentResult};
use crate::core::state::{AgentState, Goal};
use crate::memory::store::{DocumentStore, SessionFilter};
use crate::reflection::Reflection;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Active, Paused) | (Paused, Active) => true,
            (Active | Paused, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub topic: String,
    /// 会话开始后不变；当前目标以 state.goal 为准
    pub goal: Goal,
    pub state: AgentState,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub parent_id: Option<String>,
}

impl Session {
    pub fn new(topic: impl Into<String>, goal: Goal, parent_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            state: AgentState::new(goal.clone()),
            goal,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
            parent_id,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// 会话开始至今的分钟数
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds().max(0) as f64) / 60_000.0
    }
}

/// 会话管理器：会话记录存放在 DocumentStore
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn DocumentStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create_session(
        &self,
        topic: impl Into<String>,
        goal: Goal,
        parent_id: Option<String>,
    ) -> AgentResult<Session> {
        let session = Session::new(topic, goal, parent_id);
        self.store.create_session(&session).await?;
        tracing::info!(session_id = %session.id, topic = %session.topic, "session created");
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> AgentResult<Option<Session>> {
        Ok(self.store.get_session(id).await?)
    }

    async fn require(&self, id: &str) -> AgentResult<Session> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))
    }

    /// 取出会话并要求其处于 Active
    pub async fn require_active(&self, id: &str) -> AgentResult<Session> {
        match self.store.get_session(id).await? {
            Some(s) if s.is_active() => Ok(s),
            _ => Err(AgentError::NoActiveSession(id.to_string())),
        }
    }

    pub async fn save_state(&self, id: &str, state: AgentState) -> AgentResult<Session> {
        let mut session = self.require(id).await?;
        session.state = state;
        session.updated_at = Utc::now();
        self.store.update_session(&session).await?;
        Ok(session)
    }

    /// 反思记录只追加
    pub async fn append_reflection(&self, id: &str, reflection: Reflection) -> AgentResult<Session> {
        let mut session = self.require(id).await?;
        session.state.reflections.push(reflection);
        session.updated_at = Utc::now();
        self.store.update_session(&session).await?;
        Ok(session)
    }

    async fn transition(&self, id: &str, next: SessionStatus) -> AgentResult<Session> {
        let mut session = self.require(id).await?;
        if !session.status.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                from: session.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        session.status = next;
        session.updated_at = now;
        if next.is_terminal() {
            session.completed_at = Some(now);
        }
        self.store.update_session(&session).await?;
        tracing::info!(session_id = %id, status = %next, "session status changed");
        Ok(session)
    }

    pub async fn pause(&self, id: &str) -> AgentResult<Session> {
        self.transition(id, SessionStatus::Paused).await
    }

    pub async fn resume(&self, id: &str) -> AgentResult<Session> {
        self.transition(id, SessionStatus::Active).await
    }

    pub async fn complete(&self, id: &str) -> AgentResult<Session> {
        self.transition(id, SessionStatus::Completed).await
    }

    pub async fn fail(&self, id: &str) -> AgentResult<Session> {
        self.transition(id, SessionStatus::Failed).await
    }

    pub async fn cancel(&self, id: &str) -> AgentResult<Session> {
        self.transition(id, SessionStatus::Cancelled).await
    }

    pub async fn list_sessions(&self, filter: &SessionFilter) -> AgentResult<Vec<Session>> {
        Ok(self.store.list_sessions(filter).await?)
    }

    pub async fn child_sessions(&self, parent_id: &str) -> AgentResult<Vec<Session>> {
        let filter = SessionFilter {
            parent_id: Some(parent_id.to_string()),
            ..SessionFilter::default()
        };
        self.list_sessions(&filter).await
    }
}
