//! 记忆记录：Episode（情景）、Fact（语义）、Strategy（程序）及其写入参数
//!
//! 记录本身存放在 DocumentStore；向量只存在于 VectorIndex，以相同 id 关联。

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::state::{Action, Outcome};
use crate::llm::Validate;

/// 一个完成的工作单元；写入后不可变
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
    #[serde(default)]
    pub findings: Vec<String>,
    pub duration_ms: u64,
    pub success: bool,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub feedback: Option<String>,
}

impl Episode {
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.timestamp, now)
    }

    /// 供上下文拼接的单段文本
    pub fn render(&self) -> String {
        let status = if self.success { "success" } else { "failure" };
        let mut s = format!(
            "[{}] {} ({}): {}",
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.topic,
            status,
            self.summary
        );
        if !self.findings.is_empty() {
            s.push_str("\n  findings: ");
            s.push_str(&self.findings.join("; "));
        }
        s
    }
}

/// 写入 Episode 的参数
#[derive(Clone, Debug, Default)]
pub struct EpisodeInput {
    pub session_id: String,
    pub topic: String,
    pub actions: Vec<Action>,
    pub outcomes: Vec<Outcome>,
    pub findings: Vec<String>,
    pub duration_ms: u64,
    pub success: bool,
    pub summary: String,
    pub tags: Vec<String>,
    pub feedback: Option<String>,
}

impl EpisodeInput {
    pub fn new(
        session_id: impl Into<String>,
        topic: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            topic: topic.into(),
            summary: summary.into(),
            success: true,
            ..Self::default()
        }
    }
}

/// 原子化、带来源的事实
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub content: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub source: String,
    pub confidence: f64,
    pub relevance: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 相关事实 id（合并谱系）；只存 id，不嵌对象
    #[serde(default)]
    pub related_facts: Vec<String>,
}

impl Fact {
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.created_at, now)
    }

    pub fn days_since_access(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.last_accessed, now)
    }
}

/// 写入 Fact 的参数；也是从文本抽取事实时 LLM 输出的单元结构
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FactInput {
    /// 单个原子陈述
    pub content: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 由调用方填写，不要求 LLM 输出
    #[serde(default)]
    #[schemars(skip)]
    pub source: String,
    #[serde(default)]
    #[schemars(skip)]
    pub related_facts: Vec<String>,
    #[serde(default)]
    #[schemars(skip)]
    pub relevance: Option<f64>,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_confidence() -> f64 {
    0.5
}

impl FactInput {
    pub fn new(content: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            category: category.into(),
            subcategory: None,
            confidence: default_confidence(),
            tags: Vec::new(),
            source: String::new(),
            related_facts: Vec::new(),
            relevance: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl Validate for FactInput {
    fn validate(mut self) -> Result<Self, String> {
        self.content = self.content.trim().to_string();
        if self.content.is_empty() {
            return Err("fact content is empty".to_string());
        }
        self.category = self.category.trim().to_lowercase();
        if self.category.is_empty() {
            self.category = default_category();
        }
        if !self.confidence.is_finite() {
            self.confidence = default_confidence();
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self.tags = dedup_preserving(
            self.tags
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        );
        Ok(self)
    }
}

/// 可复用的研究策略及其运行统计
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub strategy_name: String,
    pub description: String,
    #[serde(default)]
    pub applicable_contexts: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub times_used: u32,
    /// 只追加，不删除
    #[serde(default)]
    pub refinements: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub last_refined: Option<DateTime<Utc>>,
    /// 归纳出该策略的 episode id
    #[serde(default)]
    pub source_episodes: Vec<String>,
}

impl Strategy {
    /// 用于嵌入检索的文本
    pub fn embedding_text(&self) -> String {
        format!(
            "{}: {} Contexts: {}",
            self.strategy_name,
            self.description,
            self.applicable_contexts.join(", ")
        )
    }

    pub fn missing_tools(&self, available: &[String]) -> Vec<String> {
        self.required_tools
            .iter()
            .filter(|t| !available.iter().any(|a| a == *t))
            .cloned()
            .collect()
    }
}

/// 写入 Strategy 的参数
#[derive(Clone, Debug, Default)]
pub struct StrategyInput {
    pub strategy_name: String,
    pub description: String,
    pub applicable_contexts: Vec<String>,
    pub required_tools: Vec<String>,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub times_used: u32,
}

impl StrategyInput {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            strategy_name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }
}

pub(crate) fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let secs = (to - from).num_seconds().max(0) as f64;
    secs / 86_400.0
}

/// 去重并保持首次出现顺序
pub(crate) fn dedup_preserving<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
