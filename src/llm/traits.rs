//! Completion 服务抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 CompletionService：complete(messages, options) 返回 CompletionResponse，
//! 响应提供「纯文本」与「扫描提取首个 JSON」两种读取方式。

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::llm::json::{self, ParsedOutput, Validate};
use crate::memory::Message;

/// LLM / Embedding 调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Empty response")]
    EmptyResponse,

    #[error("Embedding failed: {0}")]
    Embedding(String),
}

/// 单次调用参数
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// 命中即截断（在客户端侧应用，保证各后端行为一致）
    pub stop_sequences: Vec<String>,
}

impl CompletionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.push(stop.into());
        self
    }
}

/// 单次调用的 token 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Completion 响应
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    /// 纯文本（去掉首尾空白）
    pub fn text(&self) -> &str {
        self.content.trim()
    }

    /// 扫描文本，取第一个顶层 JSON 对象或数组
    pub fn json(&self) -> ParsedOutput<serde_json::Value> {
        match json::extract_json(&self.content) {
            Some(value) => ParsedOutput::Ok(value),
            None => ParsedOutput::ParseError("no JSON object or array found".to_string()),
        }
    }

    /// 提取 JSON 并按目标结构反序列化 + 校验
    pub fn parse<T: DeserializeOwned + Validate>(&self) -> ParsedOutput<T> {
        json::parse_structured(&self.content)
    }

    /// 按 stop 序列截断（第一个命中处）
    pub fn apply_stop_sequences(mut self, stops: &[String]) -> Self {
        let cut = stops
            .iter()
            .filter(|s| !s.is_empty())
            .filter_map(|s| self.content.find(s.as_str()))
            .min();
        if let Some(idx) = cut {
            self.content.truncate(idx);
        }
        self
    }
}

/// Completion 服务 trait
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, LlmError>;
}
