//! Agent 错误类型与分类
//!
//! 两类错误：前置条件错误（无活跃会话、未知 id）总是向上传播；
//! 上游服务错误（completion / embedding / vector / document）在有降级方案处被记录并替换为降级结果。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::StoreError;

/// 认知核心的统一错误类型
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("No active session: {0}")]
    NoActiveSession(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Unknown episode: {0}")]
    UnknownEpisode(String),

    #[error("Unknown fact: {0}")]
    UnknownFact(String),

    /// 反思所需的经验量不足（episode 数与 action 数都低于阈值）
    #[error("Not enough experience to reflect: {episodes} episodes, {actions} actions")]
    InsufficientExperience { episodes: usize, actions: usize },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Document store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<::config::ConfigError> for AgentError {
    fn from(e: ::config::ConfigError) -> Self {
        AgentError::Config(e.to_string())
    }
}

/// 错误大类：决定调用方是中止还是走降级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 前置条件不满足，当前操作必须中止
    Precondition,
    /// 上游服务失败，可降级的场景由调用方替换结果
    Upstream,
}

impl AgentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AgentError::NoActiveSession(_)
            | AgentError::SessionNotFound(_)
            | AgentError::InvalidTransition { .. }
            | AgentError::UnknownStrategy(_)
            | AgentError::UnknownEpisode(_)
            | AgentError::UnknownFact(_)
            | AgentError::InsufficientExperience { .. } => ErrorClass::Precondition,
            AgentError::Llm(_)
            | AgentError::Embedding(_)
            | AgentError::VectorIndex(_)
            | AgentError::Store(_)
            | AgentError::Config(_) => ErrorClass::Upstream,
        }
    }

    pub fn is_precondition(&self) -> bool {
        self.class() == ErrorClass::Precondition
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_class() {
        assert!(AgentError::NoActiveSession("s1".into()).is_precondition());
        assert!(AgentError::UnknownStrategy("x".into()).is_precondition());
        assert!(AgentError::InvalidTransition {
            from: "completed".into(),
            to: "active".into()
        }
        .is_precondition());
    }

    #[test]
    fn test_upstream_class() {
        let err = AgentError::Llm(LlmError::Request("timeout".into()));
        assert_eq!(err.class(), ErrorClass::Upstream);
        assert_eq!(
            AgentError::VectorIndex("down".into()).class(),
            ErrorClass::Upstream
        );
    }

    #[test]
    fn test_error_display() {
        let err = AgentError::InsufficientExperience {
            episodes: 1,
            actions: 2,
        };
        assert!(err.to_string().contains("1 episodes"));
    }
}
