//! LLM 层：Completion / Embedding 服务抽象、JSON 输出解析与实现（OpenAI 兼容 / Mock）

pub mod embedding;
pub mod json;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{cosine_similarity, EmbeddingKind, EmbeddingService, OpenAiEmbedder};
pub use json::{extract_json, parse_list, parse_structured, schema_hint, ParsedOutput, Validate};
pub use mock::{MockCompletion, MockEmbedder};
pub use openai::{OpenAiCompletion, UsageCounter};
pub use traits::{CompletionOptions, CompletionResponse, CompletionService, LlmError, TokenUsage};
