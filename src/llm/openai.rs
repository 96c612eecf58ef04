//! OpenAI 兼容 Completion 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::LlmSection;
use crate::llm::{CompletionOptions, CompletionResponse, CompletionService, LlmError, TokenUsage};
use crate::memory::{Message, Role};

/// 累计 token 统计（跨调用）
#[derive(Debug, Clone, Default)]
pub struct UsageCounter {
    prompt_tokens: Arc<AtomicU64>,
    completion_tokens: Arc<AtomicU64>,
}

impl UsageCounter {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let p = self.prompt_tokens.load(Ordering::Relaxed);
        let c = self.completion_tokens.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}

/// OpenAI 兼容客户端：持有 Client 与默认参数，complete 时转 Message 为 API 格式并取首条 content
pub struct OpenAiCompletion {
    client: Client<OpenAIConfig>,
    model: String,
    default_temperature: Option<f32>,
    default_max_tokens: Option<u32>,
    pub usage: UsageCounter,
}

impl OpenAiCompletion {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            default_temperature: None,
            default_max_tokens: None,
            usage: UsageCounter::default(),
        }
    }

    pub fn from_config(section: &LlmSection) -> Self {
        let mut client = Self::new(
            section.base_url.as_deref(),
            &section.model,
            section.api_key.as_deref(),
        );
        client.default_temperature = Some(section.temperature);
        client.default_max_tokens = Some(section.max_tokens);
        client
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let invalid = |e: async_openai::error::OpenAIError| LlmError::InvalidRequest(e.to_string());
        let mut out = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system_prompt {
            out.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.to_string())
                    .build()
                    .map_err(invalid)?,
            ));
        }
        for m in messages {
            let msg = match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(invalid)?,
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(invalid)?,
                ),
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(invalid)?,
                ),
            };
            out.push(msg);
        }
        Ok(out)
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, LlmError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(self.to_openai_messages(messages, options.system_prompt.as_deref())?);
        if let Some(t) = options.temperature.or(self.default_temperature) {
            builder.temperature(t);
        }
        if let Some(n) = options.max_tokens.or(self.default_max_tokens) {
            builder.max_completion_tokens(n);
        }
        let request = builder
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let usage = response.usage.as_ref().map(|u| {
            self.usage
                .add(u.prompt_tokens as u64, u.completion_tokens as u64);
            TokenUsage {
                prompt_tokens: u.prompt_tokens as u64,
                completion_tokens: u.completion_tokens as u64,
            }
        });

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or(LlmError::EmptyResponse)?;

        Ok(CompletionResponse { content, usage }.apply_stop_sequences(&options.stop_sequences))
    }
}
