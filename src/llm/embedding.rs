//! 嵌入服务：供三类记忆写入向量索引与相似度检索使用
//!
//! EmbeddingService 为异步 trait；OpenAiEmbedder 调用 OpenAI 兼容的 /embeddings 端点。

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::future::join_all;

use crate::config::EmbeddingSection;
use crate::llm::LlmError;

/// 嵌入用途：检索查询 / 入库文档（部分模型对两者使用不同前缀）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Query,
    Document,
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str, kind: EmbeddingKind) -> Result<Vec<f32>, LlmError>;

    /// 批量嵌入；默认并发逐条调用，后端可覆盖为单次批量请求
    async fn embed_batch(
        &self,
        texts: &[String],
        kind: EmbeddingKind,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        let results = join_all(texts.iter().map(|t| self.embed(t, kind))).await;
        results.into_iter().collect()
    }
}

/// 余弦相似度；维度不一致或零向量时返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 从可选 base_url / api_key 创建；api_key 缺省时读 OPENAI_API_KEY
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
        }
    }

    pub fn from_config(section: &EmbeddingSection) -> Self {
        Self::new(
            section.base_url.as_deref(),
            &section.model,
            section.api_key.as_deref(),
        )
    }

    async fn request(&self, input: EmbeddingInput) -> Result<Vec<Vec<f32>>, LlmError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(input)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| LlmError::Embedding(e.to_string()))?;
        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbedder {
    async fn embed(&self, text: &str, _kind: EmbeddingKind) -> Result<Vec<f32>, LlmError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::InvalidRequest("empty text".to_string()));
        }
        self.request(EmbeddingInput::String(text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        _kind: EmbeddingKind,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .request(EmbeddingInput::StringArray(texts.to_vec()))
            .await?;
        if vectors.len() != texts.len() {
            return Err(LlmError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}
