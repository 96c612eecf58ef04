//! Mock Completion / Embedding（用于测试，无需 API）
//!
//! MockCompletion 支持三种行为：按顺序回放脚本、始终失败、按消息内容动态生成；
//! MockEmbedder 用哈希词袋得到确定性向量，并可为指定文本钉住向量或整体切换为失败。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{
    CompletionOptions, CompletionResponse, CompletionService, EmbeddingKind, EmbeddingService,
    LlmError,
};
use crate::memory::Message;

type Responder = Box<dyn Fn(&[Message]) -> Result<String, String> + Send + Sync>;

enum Behavior {
    /// 按顺序回放；耗尽后返回 default
    Scripted {
        queue: Mutex<VecDeque<Result<String, String>>>,
        default: String,
    },
    Failing(String),
    Func(Responder),
}

pub struct MockCompletion {
    behavior: Behavior,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockCompletion {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 依次返回给定回复，耗尽后返回 "{}"
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_behavior(Behavior::Scripted {
            queue: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            default: "{}".to_string(),
        })
    }

    /// 回放包含失败项的脚本
    pub fn with_results(results: Vec<Result<String, String>>) -> Self {
        Self::with_behavior(Behavior::Scripted {
            queue: Mutex::new(results.into_iter().collect()),
            default: "{}".to_string(),
        })
    }

    /// 每次调用都失败
    pub fn failing() -> Self {
        Self::with_behavior(Behavior::Failing("mock completion unavailable".to_string()))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String, String> + Send + Sync + 'static,
    {
        Self::with_behavior(Behavior::Func(Box::new(f)))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 收到的最后一条消息内容（按调用顺序）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::with_responses(Vec::<String>::new())
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let (Ok(mut prompts), Some(last)) = (self.prompts.lock(), messages.last()) {
            prompts.push(last.content.clone());
        }

        let result = match &self.behavior {
            Behavior::Scripted { queue, default } => queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| Ok(default.clone())),
            Behavior::Failing(reason) => Err(reason.clone()),
            Behavior::Func(f) => f(messages),
        };

        result
            .map(|content| {
                CompletionResponse::new(content).apply_stop_sequences(&options.stop_sequences)
            })
            .map_err(LlmError::Request)
    }
}

const MOCK_DIMENSIONS: usize = 64;

/// 确定性嵌入：小写分词 → FNV 哈希分桶计数 → L2 归一化
pub struct MockEmbedder {
    dimensions: usize,
    pinned: Mutex<HashMap<String, Vec<f32>>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            dimensions: MOCK_DIMENSIONS,
            pinned: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        let e = Self::new();
        e.set_failing(true);
        e
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 为指定文本钉住向量（维度可与默认不同，测试里用低维向量构造精确相似度）
    pub fn pin(&self, text: impl Into<String>, vector: Vec<f32>) {
        if let Ok(mut pinned) = self.pinned.lock() {
            pinned.insert(text.into(), vector);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hash: u64 = 0xcbf29ce484222325;
            for b in word.to_lowercase().bytes() {
                hash ^= b as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            v[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedder {
    async fn embed(&self, text: &str, _kind: EmbeddingKind) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LlmError::Embedding("mock embedder unavailable".to_string()));
        }
        if let Some(v) = self.pinned.lock().ok().and_then(|p| p.get(text).cloned()) {
            return Ok(v);
        }
        Ok(self.hashed(text))
    }
}
