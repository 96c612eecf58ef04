//! 状态定义：目标、计划、进度、行动/结果与 AgentState
//!
//! AgentState 由外部编排器每轮迭代修改，并通过 SessionManager 持久化；
//! 本模块只提供数据结构与少量纯函数辅助。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::WorkingMemory;
use crate::reflection::Reflection;

/// 研究阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Planning,
    Gathering,
    Analyzing,
    Synthesizing,
    Verifying,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Gathering => "gathering",
            Phase::Analyzing => "analyzing",
            Phase::Synthesizing => "synthesizing",
            Phase::Verifying => "verifying",
            Phase::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

/// 研究目标：会话开始后不可变
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub description: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub complexity: Complexity,
}

impl Goal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            success_criteria: Vec::new(),
            constraints: Vec::new(),
            complexity: Complexity::default(),
        }
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }
}

/// 进度
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub steps_completed: u32,
    pub steps_total: u32,
    pub sources_gathered: u32,
    pub facts_extracted: u32,
    pub phase: Phase,
    /// [0, 1]
    pub confidence: f64,
}

impl Progress {
    pub fn remaining_steps(&self) -> u32 {
        self.steps_total.saturating_sub(self.steps_completed)
    }

    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = confidence.clamp(0.0, 1.0);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
}

/// 研究计划；每次重新规划 revision + 1
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    pub revision: u32,
}

impl Plan {
    pub fn from_descriptions<I, S>(descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps = descriptions
            .into_iter()
            .enumerate()
            .map(|(i, d)| PlanStep {
                id: format!("step_{}", i + 1),
                description: d.into(),
                status: StepStatus::Pending,
            })
            .collect();
        Self { steps, revision: 0 }
    }

    /// 用新步骤替换计划（已完成的步骤保留）
    pub fn revise<I, S>(&mut self, descriptions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.retain(|s| s.status == StepStatus::Done);
        let offset = self.steps.len();
        self.steps
            .extend(descriptions.into_iter().enumerate().map(|(i, d)| PlanStep {
                id: format!("step_{}", offset + i + 1),
                description: d.into(),
                status: StepStatus::Pending,
            }));
        self.revision += 1;
    }

    pub fn next_pending(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.status == StepStatus::Pending)
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .count()
    }
}

/// 行动类型；每类对应一个默认工具
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    #[default]
    Search,
    Fetch,
    Analyze,
    Synthesize,
    Reflect,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Search => "search",
            ActionType::Fetch => "fetch",
            ActionType::Analyze => "analyze",
            ActionType::Synthesize => "synthesize",
            ActionType::Reflect => "reflect",
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            ActionType::Search => "web_search",
            ActionType::Fetch => "fetch_content",
            ActionType::Analyze => "content_analyzer",
            ActionType::Synthesize => "synthesizer",
            ActionType::Reflect => "reflect",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub action_type: ActionType,
    pub tool: String,
    pub parameters: serde_json::Value,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl Action {
    pub fn new(
        action_type: ActionType,
        parameters: serde_json::Value,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action_type,
            tool: action_type.tool_name().to_string(),
            parameters,
            reasoning: reasoning.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub action_id: String,
    pub success: bool,
    #[serde(default)]
    pub result: serde_json::Value,
    pub error: Option<String>,
    #[serde(default)]
    pub observations: Vec<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl Outcome {
    pub fn success(action_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            action_id: action_id.into(),
            success: true,
            result,
            error: None,
            observations: Vec::new(),
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(action_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            success: false,
            result: serde_json::Value::Null,
            error: Some(error.into()),
            observations: Vec::new(),
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observations.push(observation.into());
        self
    }

    /// 结果的文本形式：字符串原样返回，其它 JSON 序列化
    pub fn result_text(&self) -> String {
        match &self.result {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// 每轮迭代被编排器修改的完整状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub goal: Goal,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub working_memory: WorkingMemory,
    #[serde(default)]
    pub reflections: Vec<Reflection>,
    #[serde(default)]
    pub iteration_count: u32,
    pub last_action_timestamp: Option<DateTime<Utc>>,
}

impl AgentState {
    pub fn new(goal: Goal) -> Self {
        Self {
            goal,
            plan: Plan::default(),
            progress: Progress::default(),
            working_memory: WorkingMemory::new(),
            reflections: Vec::new(),
            iteration_count: 0,
            last_action_timestamp: None,
        }
    }

    /// 记录一次 action / outcome：迭代数 + 1，写入 working memory
    pub fn record_iteration(&mut self, action: Action, outcome: Outcome) {
        self.iteration_count += 1;
        self.last_action_timestamp = Some(outcome.timestamp);
        self.working_memory.record(action, outcome);
    }

    pub fn last_reflection(&self) -> Option<&Reflection> {
        self.reflections.last()
    }
}
