//! Critic：从行动结果中提炼 learnings，并判断是否继续 / 重新规划
//!
//! learnings 依次尝试：LLM 返回的 JSON → 回复中的列表行 → 一行备注。
//! 可通过配置只对部分工具调用 LLM，其余工具直接生成备注。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::config::ReasoningSection;
use crate::core::state::{Action, AgentState, Outcome, Phase};
use crate::llm::{parse_list, CompletionOptions, CompletionService};
use crate::memory::Message;

const MAX_LEARNINGS: usize = 5;
const RESULT_PREVIEW_CHARS: usize = 1500;
const CONTINUE_CONFIDENCE: f64 = 0.3;
const REPLAN_CONFIDENCE: f64 = 0.4;
const REPLAN_MIN_STEPS: u32 = 3;

const DEFAULT_PROMPT: &str = "Goal: {goal}\nAction: {action} via {tool}\nResult ({status}):\n{result}\n\n\
List what this result teaches about the goal. Reply with JSON: {\"learnings\": [\"...\"]}";

static BULLET_RE: OnceLock<Regex> = OnceLock::new();

/// 回复中 `- xxx` / `* xxx` / `1. xxx` 形式的行
pub fn parse_bullets(text: &str) -> Vec<String> {
    let re = BULLET_RE.get_or_init(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+(.+?)\s*$").unwrap());
    text.lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|s| !s.is_empty())
        .take(MAX_LEARNINGS)
        .collect()
}

/// 兜底：一行描述本次结果
pub fn outcome_note(action: &Action, outcome: &Outcome) -> String {
    if outcome.success {
        let text = outcome.result_text();
        if text.is_empty() {
            format!("{} via {} succeeded", action.action_type, action.tool)
        } else {
            let preview: String = text.chars().take(120).collect();
            format!("{} via {} succeeded: {}", action.action_type, action.tool, preview)
        }
    } else {
        format!(
            "{} via {} failed: {}",
            action.action_type,
            action.tool,
            outcome.error.as_deref().unwrap_or("unknown error")
        )
    }
}

/// 已完成时停止；否则本次成功或置信度 > 0.3 即继续
pub fn should_continue(state: &AgentState, outcome: &Outcome) -> bool {
    if state.progress.phase == Phase::Completed {
        return false;
    }
    outcome.success || state.progress.confidence > CONTINUE_CONFIDENCE
}

/// 最近 3 次中至少 2 次失败，或置信度 < 0.4 且已完成 3 步以上
pub fn should_replan(state: &AgentState) -> bool {
    state.working_memory.failures_in_last(3) >= 2
        || (state.progress.confidence < REPLAN_CONFIDENCE
            && state.progress.steps_completed > REPLAN_MIN_STEPS)
}

/// 本次失败时也要重新规划
pub fn should_replan_after(state: &AgentState, outcome: &Outcome) -> bool {
    !outcome.success || should_replan(state)
}

/// Critic：持有 LLM 与 prompt 模板
pub struct Critic {
    llm: Arc<dyn CompletionService>,
    prompt_template: String,
    /// 为空表示评估所有工具
    evaluate_tools: HashSet<String>,
}

impl Critic {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self {
            llm,
            prompt_template: DEFAULT_PROMPT.to_string(),
            evaluate_tools: HashSet::new(),
        }
    }

    pub fn from_config(llm: Arc<dyn CompletionService>, config: &ReasoningSection) -> Self {
        Self::new(llm).with_evaluate_tools(config.critic_tools.clone())
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    pub fn with_evaluate_tools(mut self, tools: Vec<String>) -> Self {
        self.evaluate_tools = tools.into_iter().collect();
        self
    }

    fn should_evaluate(&self, tool: &str) -> bool {
        self.evaluate_tools.is_empty() || self.evaluate_tools.contains(tool)
    }

    /// 提炼 learnings；永不失败，最差返回一行备注
    pub async fn learnings(&self, goal: &str, action: &Action, outcome: &Outcome) -> Vec<String> {
        if !self.should_evaluate(&action.tool) {
            return vec![outcome_note(action, outcome)];
        }

        let result = if outcome.success {
            outcome.result_text().chars().take(RESULT_PREVIEW_CHARS).collect()
        } else {
            outcome.error.clone().unwrap_or_default()
        };
        let prompt = self
            .prompt_template
            .replace("{goal}", goal)
            .replace("{action}", action.action_type.as_str())
            .replace("{tool}", &action.tool)
            .replace("{status}", if outcome.success { "success" } else { "failure" })
            .replace("{result}", &result);

        let reply = match self
            .llm
            .complete(&[Message::user(prompt)], &CompletionOptions::new())
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(tool = %action.tool, error = %e, "learning extraction unavailable");
                return vec![outcome_note(action, outcome)];
            }
        };

        if let Some(mut list) = parse_list::<String>(reply.text(), "learnings").ok() {
            if !list.is_empty() {
                list.truncate(MAX_LEARNINGS);
                return list;
            }
        }
        let bullets = parse_bullets(reply.text());
        if !bullets.is_empty() {
            tracing::debug!(tool = %action.tool, count = bullets.len(), "learnings parsed from list lines");
            return bullets;
        }
        vec![outcome_note(action, outcome)]
    }
}
