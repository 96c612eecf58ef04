//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCOUT__*` 覆盖（双下划线表示嵌套，如 `SCOUT__MEMORY__REFLECTION_INTERVAL=8`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::error::{AgentError, AgentResult};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub memory: MemorySection,
    pub reflection: ReflectionSection,
    pub reasoning: ReasoningSection,
    pub storage: StorageSection,
}

/// [llm] 段：Completion 服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.3,
            max_tokens: 2000,
        }
    }
}

/// [embedding] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

/// [memory] 段：上下文预算、检索与合并阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// build_context 默认总 token 预算
    pub context_max_tokens: usize,
    /// 预算划分（episodic / semantic / procedural），和应为 1
    pub episodic_share: f64,
    pub semantic_share: f64,
    pub procedural_share: f64,
    /// store_experience 累计多少次后提示可以反思
    pub reflection_interval: usize,
    /// 事实合并的余弦相似度阈值
    pub similarity_threshold: f32,
    /// 单次 build_context 每类记忆最多拉取的候选数
    pub candidate_limit: usize,
    /// 早于该天数的 episode 进入合并候选
    pub consolidation_age_days: i64,
    /// 同一会话至少多少条旧 episode 才交给合并器
    pub consolidation_min_group: usize,
    /// store_experience 时是否默认抽取事实
    pub extract_facts: bool,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            context_max_tokens: 4000,
            episodic_share: 0.4,
            semantic_share: 0.4,
            procedural_share: 0.2,
            reflection_interval: 5,
            similarity_threshold: 0.85,
            candidate_limit: 50,
            consolidation_age_days: 30,
            consolidation_min_group: 5,
            extract_facts: true,
        }
    }
}

impl MemorySection {
    /// 检查取值范围；不合法时返回 AgentError::Config
    pub fn validate(&self) -> AgentResult<()> {
        let shares = [self.episodic_share, self.semantic_share, self.procedural_share];
        if shares.iter().any(|s| !s.is_finite() || *s < 0.0) || shares.iter().sum::<f64>() <= 0.0 {
            return Err(AgentError::Config(format!(
                "memory budget shares must be non-negative with a positive sum, got {:?}",
                shares
            )));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(AgentError::Config(format!(
                "memory.similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.reflection_interval == 0 || self.candidate_limit == 0 {
            return Err(AgentError::Config(
                "memory.reflection_interval and memory.candidate_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// [reflection] 段：触发策略与反思门槛
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReflectionSection {
    /// 距上次反思的迭代数达到该值即触发
    pub interval: u32,
    /// 编排器的最大迭代数（接近上限时触发反思）
    pub max_iterations: u32,
    pub min_episodes: usize,
    pub min_actions: usize,
    pub consolidate_episode_threshold: usize,
    pub consolidate_fact_threshold: usize,
}

impl Default for ReflectionSection {
    fn default() -> Self {
        Self {
            interval: 5,
            max_iterations: 50,
            min_episodes: 2,
            min_actions: 3,
            consolidate_episode_threshold: 50,
            consolidate_fact_threshold: 100,
        }
    }
}

/// [reasoning] 段：ReAct 候选数量、记忆条数与 Critic 评估范围
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningSection {
    /// 每轮最多保留的候选行动数
    pub max_options: usize,
    /// 注入推理上下文的相关记忆条数
    pub memory_items: usize,
    /// 仅对这些工具的结果调用 LLM 提炼 learnings；为空表示全部
    pub critic_tools: Vec<String>,
}

impl Default for ReasoningSection {
    fn default() -> Self {
        Self {
            max_options: 4,
            memory_items: 5,
            critic_tools: Vec::new(),
        }
    }
}

/// [storage] 段：文档存储后端
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StorageSection {
    /// 设置后使用 SQLite 文档存储，否则使用内存存储
    pub sqlite_path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 SCOUT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCOUT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCOUT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

impl AppConfig {
    /// load_config 之后再做取值检查，错误统一为 AgentError::Config
    pub fn load(config_path: Option<PathBuf>) -> AgentResult<Self> {
        let cfg = load_config(config_path)?;
        cfg.memory.validate()?;
        Ok(cfg)
    }
}
