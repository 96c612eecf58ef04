//! Planner：生成候选行动并打分选择
//!
//! LLM 按 schema 返回 2–4 个候选 {action, rationale, expectedBenefit, potentialRisks, estimatedCost, confidence}；
//! 解析后夹取区间、截断数量，按 `0.7·confidence − 0.3·cost/10` 取最优。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::state::{ActionType, AgentState, Plan};
use crate::llm::{parse_list, schema_hint, CompletionOptions, CompletionService, ParsedOutput, Validate};
use crate::memory::Message;

pub const CONFIDENCE_WEIGHT: f64 = 0.7;
pub const COST_WEIGHT: f64 = 0.3;
pub const MAX_OPTIONS: usize = 4;
const RECENT_PAIRS: usize = 3;
const MAX_FINDINGS: usize = 5;

const DEFAULT_SYSTEM_PROMPT: &str = "You are the planning component of an autonomous research agent. \
Propose concrete next actions that move the research goal forward. Reply with JSON only.";

/// 一个候选行动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionOption {
    /// 行动描述，例如 "search for recent benchmarks"
    pub action: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub expected_benefit: String,
    #[serde(default)]
    pub potential_risks: Vec<String>,
    /// 1–10
    #[serde(default = "default_cost")]
    pub estimated_cost: f64,
    /// 0–1
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_cost() -> f64 {
    5.0
}

fn default_confidence() -> f64 {
    0.5
}

impl Validate for ActionOption {
    fn validate(mut self) -> Result<Self, String> {
        self.action = self.action.trim().to_string();
        if self.action.is_empty() {
            return Err("empty action".to_string());
        }
        if !self.estimated_cost.is_finite() || !self.confidence.is_finite() {
            return Err("non-numeric cost or confidence".to_string());
        }
        self.estimated_cost = self.estimated_cost.clamp(1.0, 10.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self.potential_risks.retain(|r| !r.trim().is_empty());
        Ok(self)
    }
}

/// 候选打分：高置信、低成本优先
pub fn option_score(option: &ActionOption) -> f64 {
    CONFIDENCE_WEIGHT * option.confidence - COST_WEIGHT * option.estimated_cost / 10.0
}

/// 取分数最高的候选下标；并列时取靠前者
pub fn select_option(options: &[ActionOption]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, option) in options.iter().enumerate() {
        let score = option_score(option);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// 推理上下文：拼成 prompt 的全部素材
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasoningContext {
    pub goal: String,
    pub progress: String,
    /// 计划进度与下一步；没有计划时为空
    pub plan: String,
    pub recent: Vec<String>,
    pub tools: Vec<String>,
    pub tools_used: Vec<String>,
    pub findings: Vec<String>,
    pub open_questions: Vec<String>,
    pub memories: Vec<String>,
    pub constraints: Vec<String>,
}

fn plan_summary(plan: &Plan) -> String {
    let total = plan.steps.len();
    match plan.next_pending() {
        Some(step) => format!(
            "{}/{} steps done (revision {}), next: {}",
            plan.completed_count(),
            total,
            plan.revision,
            step.description
        ),
        None if total == 0 => String::new(),
        None => format!("{}/{} steps done (revision {})", plan.completed_count(), total, plan.revision),
    }
}

impl ReasoningContext {
    /// 从状态组装上下文；memories 由调用方另行填充
    pub fn from_state(state: &AgentState) -> Self {
        let p = &state.progress;
        let progress = format!(
            "phase {}, {}/{} steps, {} sources, {} facts, confidence {:.2}",
            p.phase, p.steps_completed, p.steps_total, p.sources_gathered, p.facts_extracted, p.confidence
        );
        let recent = state
            .working_memory
            .last_pairs(RECENT_PAIRS)
            .into_iter()
            .map(|(a, o)| {
                let result = if o.success {
                    let text = o.result_text();
                    format!("ok: {}", text.chars().take(160).collect::<String>())
                } else {
                    format!("failed: {}", o.error.as_deref().unwrap_or("unknown error"))
                };
                format!("{} via {} -> {}", a.action_type, a.tool, result)
            })
            .collect();
        let tools = [
            ActionType::Search,
            ActionType::Fetch,
            ActionType::Analyze,
            ActionType::Synthesize,
            ActionType::Reflect,
        ]
        .iter()
        .map(|t| t.tool_name().to_string())
        .collect();

        let wm = &state.working_memory;
        let skip = wm.key_findings.len().saturating_sub(MAX_FINDINGS);

        Self {
            goal: state.goal.description.clone(),
            progress,
            plan: plan_summary(&state.plan),
            recent,
            tools,
            tools_used: wm.tool_names_used(),
            findings: wm.key_findings[skip..].to_vec(),
            open_questions: wm.open_questions.clone(),
            memories: Vec::new(),
            constraints: state.goal.constraints.clone(),
        }
    }

    pub fn with_memories(mut self, memories: Vec<String>) -> Self {
        self.memories = memories;
        self
    }

    pub fn render(&self) -> String {
        let list = |items: &[String]| {
            if items.is_empty() {
                "(none)".to_string()
            } else {
                items
                    .iter()
                    .map(|i| format!("- {}", i))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        let plan = if self.plan.is_empty() { "(none)" } else { self.plan.as_str() };
        let used = if self.tools_used.is_empty() {
            "(none)".to_string()
        } else {
            self.tools_used.join(", ")
        };
        format!(
            "Goal: {}\nProgress: {}\nPlan: {}\n\nRecent actions:\n{}\n\nAvailable tools: {}\n\
             Tools used so far: {}\n\nKey findings:\n{}\n\nOpen questions:\n{}\n\n\
             Relevant memories:\n{}\n\nConstraints:\n{}",
            self.goal,
            self.progress,
            plan,
            list(&self.recent),
            self.tools.join(", "),
            used,
            list(&self.findings),
            list(&self.open_questions),
            list(&self.memories),
            list(&self.constraints)
        )
    }
}

/// Planner：持有 LLM 与 system prompt
pub struct Planner {
    llm: Arc<dyn CompletionService>,
    system_prompt: String,
    max_options: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self {
            llm,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_options: MAX_OPTIONS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_options(mut self, max_options: usize) -> Self {
        self.max_options = max_options.clamp(1, MAX_OPTIONS);
        self
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 请求候选行动；服务失败、无合法候选都归为 ParseError
    pub async fn propose(&self, context: &ReasoningContext) -> ParsedOutput<Vec<ActionOption>> {
        let prompt = format!(
            "{}\n\nPropose 2 to {} next actions. Reply with JSON: {{\"options\": [...]}} \
             where each option matches this schema:\n{}",
            context.render(),
            self.max_options,
            schema_hint::<ActionOption>()
        );
        let options = CompletionOptions::new().with_system(self.system_prompt.clone());
        let response = match self.llm.complete(&[Message::user(prompt)], &options).await {
            Ok(r) => r,
            Err(e) => return ParsedOutput::ParseError(e.to_string()),
        };
        match parse_list::<ActionOption>(response.text(), "options") {
            ParsedOutput::Ok(mut list) => {
                list.truncate(self.max_options);
                if list.is_empty() {
                    ParsedOutput::ParseError("no options proposed".to_string())
                } else {
                    ParsedOutput::Ok(list)
                }
            }
            err => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Action, Goal, Outcome, StepStatus};
    use crate::llm::MockCompletion;
    use serde_json::json;

    fn option(action: &str, cost: f64, confidence: f64) -> ActionOption {
        ActionOption {
            action: action.into(),
            rationale: String::new(),
            expected_benefit: String::new(),
            potential_risks: vec![],
            estimated_cost: cost,
            confidence,
        }
    }

    #[test]
    fn test_option_score() {
        let o = option("search", 5.0, 0.8);
        assert!((option_score(&o) - (0.56 - 0.15)).abs() < 1e-9);
    }

    #[test]
    fn test_select_first_wins_ties() {
        let options = vec![
            option("a", 2.0, 0.5),
            option("b", 9.0, 0.9),
            option("c", 2.0, 0.5),
        ];
        // a: 0.35 - 0.06 = 0.29; b: 0.63 - 0.27 = 0.36
        assert_eq!(select_option(&options), Some(1));
        assert_eq!(select_option(&options[..1]), Some(0));
        assert_eq!(select_option(&[option("x", 1.0, 0.1), option("y", 1.0, 0.1)]), Some(0));
        assert_eq!(select_option(&[]), None);
    }

    #[test]
    fn test_validate_clamps() {
        let o = option("  fetch  ", 42.0, 1.5).validate().unwrap();
        assert_eq!(o.action, "fetch");
        assert_eq!(o.estimated_cost, 10.0);
        assert_eq!(o.confidence, 1.0);
        assert!(option("   ", 1.0, 0.5).validate().is_err());
    }

    #[test]
    fn test_context_render() {
        let mut state = AgentState::new(Goal::new("compare runtimes").with_constraint("only 2024 sources"));
        let a = Action::new(ActionType::Search, json!({"query": "tokio"}), "");
        let o = Outcome::failure(&a.id, "rate limited");
        state.record_iteration(a, o);
        let ctx = ReasoningContext::from_state(&state).with_memories(vec!["[fact] tokio is popular".into()]);
        let text = ctx.render();
        assert!(text.contains("compare runtimes"));
        assert!(text.contains("search via web_search -> failed: rate limited"));
        assert!(text.contains("fetch_content"));
        assert!(text.contains("[fact] tokio is popular"));
        assert!(text.contains("only 2024 sources"));
        assert!(text.contains("Plan: (none)"));
        assert!(text.contains("Tools used so far: web_search"));
    }

    #[test]
    fn test_context_includes_plan_and_notes() {
        let mut state = AgentState::new(Goal::new("compare runtimes"));
        state.plan = Plan::from_descriptions(["list runtimes", "read benchmarks", "write summary"]);
        state.plan.steps[0].status = StepStatus::Done;
        for i in 0..7 {
            state.working_memory.add_finding(format!("finding {i}"));
        }
        state.working_memory.add_question("does smol support io_uring?");

        let ctx = ReasoningContext::from_state(&state);
        assert_eq!(ctx.plan, "1/3 steps done (revision 0), next: read benchmarks");
        assert_eq!(ctx.findings.first().map(String::as_str), Some("finding 2"));
        assert_eq!(ctx.findings.len(), 5);
        let text = ctx.render();
        assert!(text.contains("Plan: 1/3 steps done"));
        assert!(text.contains("- does smol support io_uring?"));
        assert!(text.contains("- finding 6"));
        assert!(!text.contains("- finding 1\n"));
    }

    #[tokio::test]
    async fn test_propose_truncates_and_clamps() {
        let reply = json!({"options": [
            {"action": "search a", "estimatedCost": 0, "confidence": 0.5},
            {"action": "search b", "estimatedCost": 3, "confidence": 2},
            {"action": "", "estimatedCost": 3, "confidence": 0.2},
            {"action": "fetch c", "estimatedCost": 4, "confidence": 0.4},
            {"action": "analyze d", "estimatedCost": 5, "confidence": 0.4},
            {"action": "synthesize e", "estimatedCost": 6, "confidence": 0.4}
        ]})
        .to_string();
        let planner = Planner::new(Arc::new(MockCompletion::with_responses([reply])));
        let ctx = ReasoningContext::from_state(&AgentState::new(Goal::new("g")));
        let options = planner.propose(&ctx).await.ok().unwrap();
        assert_eq!(options.len(), 4);
        assert_eq!(options[0].estimated_cost, 1.0);
        assert_eq!(options[1].confidence, 1.0);
        assert_eq!(options[2].action, "fetch c");
    }

    #[tokio::test]
    async fn test_propose_failure_is_parse_error() {
        let planner = Planner::new(Arc::new(MockCompletion::failing()));
        let ctx = ReasoningContext::default();
        assert!(!planner.propose(&ctx).await.is_ok());

        let planner = Planner::new(Arc::new(MockCompletion::with_responses([r#"{"options": []}"#])));
        assert!(!planner.propose(&ctx).await.is_ok());
    }
}
