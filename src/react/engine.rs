//! ReAct 推理引擎：reason（选行动）与 observe（看结果）
//!
//! reason 在 Planner 失败或没有合法候选时走确定性降级表；
//! 记忆检索是可选且尽力而为的，检索不到不影响推理。

use std::sync::Arc;

use crate::config::ReasoningSection;
use crate::core::state::{Action, AgentState, Outcome};
use crate::llm::{CompletionService, ParsedOutput};
use crate::memory::MemorySystem;
use crate::react::action::build_action;
use crate::react::critic::{self, Critic};
use crate::react::fallback::fallback_option;
use crate::react::planner::{option_score, select_option, ActionOption, Planner, ReasoningContext};

/// 一次 reason 的结果
#[derive(Debug, Clone)]
pub struct ReasoningResult {
    pub options: Vec<ActionOption>,
    /// options 中被选中的下标
    pub selected: usize,
    pub action: Action,
    pub used_fallback: bool,
    pub context: ReasoningContext,
}

impl ReasoningResult {
    pub fn selected_option(&self) -> &ActionOption {
        &self.options[self.selected]
    }
}

/// 一次 observe 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub learnings: Vec<String>,
    pub should_continue: bool,
    pub should_replan: bool,
}

pub struct ReasoningEngine {
    planner: Planner,
    critic: Critic,
    memory: Option<Arc<MemorySystem>>,
    memory_items: usize,
}

impl ReasoningEngine {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self::from_config(llm, &ReasoningSection::default())
    }

    pub fn from_config(llm: Arc<dyn CompletionService>, config: &ReasoningSection) -> Self {
        Self {
            planner: Planner::new(llm.clone()).with_max_options(config.max_options),
            critic: Critic::from_config(llm, config),
            memory: None,
            memory_items: config.memory_items,
        }
    }

    /// 挂接记忆系统，reason 时注入相关记忆
    pub fn with_memory(mut self, memory: Arc<MemorySystem>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_critic(mut self, critic: Critic) -> Self {
        self.critic = critic;
        self
    }

    async fn relevant_memories(&self, state: &AgentState) -> Vec<String> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        let opts = memory.context_options();
        let context = memory.build_context(&state.goal.description, &opts).await;
        if !context.degraded.is_empty() {
            tracing::debug!(degraded = ?context.degraded, "memory context partially unavailable");
        }
        context.top_items(self.memory_items)
    }

    pub async fn reason(&self, state: &AgentState) -> ReasoningResult {
        let memories = self.relevant_memories(state).await;
        let context = ReasoningContext::from_state(state).with_memories(memories);

        let proposed = match self.planner.propose(&context).await {
            ParsedOutput::Ok(options) => select_option(&options).map(|i| (options, i)),
            ParsedOutput::ParseError(e) => {
                tracing::warn!(error = %e, "planner unavailable, using fallback action");
                None
            }
        };

        let (options, selected, used_fallback) = match proposed {
            Some((options, selected)) => (options, selected, false),
            None => (vec![fallback_option(&state.progress)], 0, true),
        };
        let chosen = &options[selected];
        let action = build_action(chosen, state);
        tracing::debug!(
            iteration = state.iteration_count,
            candidates = options.len(),
            score = option_score(chosen),
            action_type = %action.action_type,
            used_fallback,
            "action selected"
        );

        ReasoningResult {
            options,
            selected,
            action,
            used_fallback,
            context,
        }
    }

    /// state 应已包含本次 action / outcome（record_iteration 之后调用）
    pub async fn observe(&self, state: &AgentState, action: &Action, outcome: &Outcome) -> Observation {
        let learnings = self
            .critic
            .learnings(&state.goal.description, action, outcome)
            .await;
        let observation = Observation {
            learnings,
            should_continue: critic::should_continue(state, outcome),
            should_replan: critic::should_replan_after(state, outcome),
        };
        tracing::debug!(
            action_id = %action.id,
            success = outcome.success,
            should_continue = observation.should_continue,
            should_replan = observation.should_replan,
            "outcome observed"
        );
        observation
    }

    pub fn should_replan(&self, state: &AgentState) -> bool {
        critic::should_replan(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{ActionType, Goal};
    use crate::llm::MockCompletion;
    use serde_json::json;

    #[tokio::test]
    async fn test_reason_selects_best_option() {
        let reply = json!({"options": [
            {"action": "search broadly", "estimatedCost": 2, "confidence": 0.5},
            {"action": "fetch the tokio docs", "rationale": "primary source", "estimatedCost": 3, "confidence": 0.9}
        ]})
        .to_string();
        let engine = ReasoningEngine::new(Arc::new(MockCompletion::with_responses([reply])));
        let result = engine.reason(&AgentState::new(Goal::new("tokio internals"))).await;
        assert!(!result.used_fallback);
        assert_eq!(result.selected, 1);
        assert_eq!(result.action.action_type, ActionType::Fetch);
        assert_eq!(result.selected_option().rationale, "primary source");
    }

    #[tokio::test]
    async fn test_fallback_fetches_when_sources_but_no_facts() {
        let engine = ReasoningEngine::new(Arc::new(MockCompletion::failing()));
        let mut state = AgentState::new(Goal::new("g"));
        state.progress.sources_gathered = 10;
        state.progress.facts_extracted = 0;

        let result = engine.reason(&state).await;
        assert!(result.used_fallback);
        assert_eq!(result.action.action_type, ActionType::Fetch);
        assert_eq!(result.action.tool, "fetch_content");
        assert_eq!(result.selected_option().confidence, 0.3);

        let again = engine.reason(&state).await;
        assert_eq!(again.options, result.options);
    }

    #[tokio::test]
    async fn test_observe_failure_replans() {
        let engine = ReasoningEngine::new(Arc::new(MockCompletion::failing()));
        let mut state = AgentState::new(Goal::new("g"));
        state.progress.confidence = 0.5;
        let a = Action::new(ActionType::Search, json!({}), "");
        let o = Outcome::failure(&a.id, "503");
        state.record_iteration(a.clone(), o.clone());

        let obs = engine.observe(&state, &a, &o).await;
        assert!(obs.should_continue);
        assert!(obs.should_replan);
        assert_eq!(obs.learnings, vec!["search via web_search failed: 503"]);
        assert!(!engine.should_replan(&state));
    }
}
