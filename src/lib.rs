//! Scout - 自主研究 Agent 的认知核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、状态定义、会话生命周期
//! - **llm**: Completion / Embedding 服务抽象与实现（OpenAI 兼容 / Mock），LLM 输出解析
//! - **memory**: 情景 / 语义 / 程序性记忆，文档存储与向量索引，记忆系统协调
//! - **observability**: tracing 初始化
//! - **react**: 推理引擎（候选行动、降级表、结果观察）
//! - **reflection**: 反思引擎与触发策略

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod reflection;

pub use crate::core::{AgentError, AgentResult, AgentState, Session, SessionManager};
pub use memory::MemorySystem;
pub use react::ReasoningEngine;
pub use reflection::{ReflectionEngine, ReflectionPolicy};
