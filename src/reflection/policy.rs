//! 反思触发策略与反思结果到行为调整的映射
//!
//! `trigger` 是纯函数：只读 AgentState 与配置，按固定顺序检查五条规则。

use serde::{Deserialize, Serialize};

use crate::config::ReflectionSection;
use crate::core::state::{ActionType, AgentState, Phase, Plan, StepStatus};
use crate::reflection::types::{Recommendation, Reflection};

const FAILURE_WINDOW: usize = 3;
const FAILURE_LIMIT: usize = 2;
const LOW_CONFIDENCE: f64 = 0.4;
const LOW_CONFIDENCE_MIN_ITERATIONS: u32 = 3;
const ITERATION_LIMIT_RATIO: f64 = 0.8;

/// 触发反思的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// 距上次反思已过 interval 轮
    Interval,
    /// 最近 3 次结果中至少 2 次失败
    RepeatedFailures,
    LowConfidence,
    /// 接近最大迭代数且尚未完成
    NearIterationLimit,
    /// 上一个行动本身就是 reflect
    ExplicitRequest,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Interval => "interval",
            TriggerReason::RepeatedFailures => "repeated_failures",
            TriggerReason::LowConfidence => "low_confidence",
            TriggerReason::NearIterationLimit => "near_iteration_limit",
            TriggerReason::ExplicitRequest => "explicit_request",
        }
    }
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 判断本轮是否需要反思；`last_reflection_iteration` 为空时取 state 中最后一次反思的迭代号
pub fn trigger(
    state: &AgentState,
    last_reflection_iteration: Option<u32>,
    config: &ReflectionSection,
) -> Option<TriggerReason> {
    let last = last_reflection_iteration
        .or_else(|| state.last_reflection().map(|r| r.iteration_number))
        .unwrap_or(0);

    if config.interval > 0 && state.iteration_count.saturating_sub(last) >= config.interval {
        return Some(TriggerReason::Interval);
    }

    if state.working_memory.failures_in_last(FAILURE_WINDOW) >= FAILURE_LIMIT {
        return Some(TriggerReason::RepeatedFailures);
    }

    if state.progress.confidence < LOW_CONFIDENCE
        && state.iteration_count > LOW_CONFIDENCE_MIN_ITERATIONS
    {
        return Some(TriggerReason::LowConfidence);
    }

    if state.progress.phase != Phase::Completed
        && state.iteration_count as f64 > ITERATION_LIMIT_RATIO * config.max_iterations as f64
    {
        return Some(TriggerReason::NearIterationLimit);
    }

    if state
        .working_memory
        .recent_actions
        .last()
        .is_some_and(|a| a.action_type == ActionType::Reflect)
    {
        return Some(TriggerReason::ExplicitRequest);
    }

    None
}

/// 带状态的触发器：记住上次反思发生在第几轮
#[derive(Clone, Debug)]
pub struct ReflectionPolicy {
    config: ReflectionSection,
    last_reflection_iteration: Option<u32>,
}

impl ReflectionPolicy {
    pub fn from_config(config: &ReflectionSection) -> Self {
        Self {
            config: config.clone(),
            last_reflection_iteration: None,
        }
    }

    pub fn should_reflect(&self, state: &AgentState) -> Option<TriggerReason> {
        let reason = trigger(state, self.last_reflection_iteration, &self.config);
        if let Some(reason) = reason {
            tracing::debug!(
                iteration = state.iteration_count,
                reason = %reason,
                "reflection triggered"
            );
        }
        reason
    }

    pub fn mark_reflected(&mut self, iteration: u32) {
        self.last_reflection_iteration = Some(iteration);
    }

    pub fn last_reflection_iteration(&self) -> Option<u32> {
        self.last_reflection_iteration
    }

    pub fn reset(&mut self) {
        self.last_reflection_iteration = None;
    }
}

impl Default for ReflectionPolicy {
    fn default() -> Self {
        Self::from_config(&ReflectionSection::default())
    }
}

/// 反思对后续行为的影响
#[derive(Clone, Debug, PartialEq)]
pub struct BehaviorAdjustment {
    pub replan: bool,
    pub recommendation: Recommendation,
    pub focus: String,
    pub notes: Vec<String>,
}

impl BehaviorAdjustment {
    /// 需要重新规划时改写计划：已完成步骤保留，focus 成为下一步，其余未完成步骤顺延。
    /// 返回计划是否被改写
    pub fn apply(&self, plan: &mut Plan) -> bool {
        if !self.replan {
            return false;
        }
        let focus = self.focus.trim();
        let mut steps: Vec<String> = Vec::new();
        if !focus.is_empty() {
            steps.push(focus.to_string());
        }
        steps.extend(
            plan.steps
                .iter()
                .filter(|s| s.status != StepStatus::Done && s.description != focus)
                .map(|s| s.description.clone()),
        );
        plan.revise(steps);
        tracing::debug!(
            revision = plan.revision,
            next = plan.next_pending().map(|s| s.description.as_str()).unwrap_or(""),
            "plan revised after reflection"
        );
        true
    }
}

/// 建议为 change 时即使 LLM 没要求也重新规划
pub fn adjustments(reflection: &Reflection) -> BehaviorAdjustment {
    let recommendation = reflection.strategy_evaluation.recommendation;
    let mut notes = reflection.adjustments.clone();
    if recommendation == Recommendation::Change {
        notes.extend(
            reflection
                .strategy_evaluation
                .alternative_strategies
                .iter()
                .map(|alt| format!("consider: {}", alt)),
        );
    }
    BehaviorAdjustment {
        replan: reflection.should_replan || recommendation == Recommendation::Change,
        recommendation,
        focus: reflection.next_focus.clone(),
        notes,
    }
}
