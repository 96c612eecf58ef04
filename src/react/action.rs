//! 候选行动 → Action：关键词推断类型，按工具补默认参数

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::core::state::{Action, ActionType, AgentState};
use crate::memory::types::dedup_preserving;
use crate::react::planner::ActionOption;

const MAX_URLS: usize = 5;

static KEYWORD_RES: OnceLock<Vec<(ActionType, Regex)>> = OnceLock::new();
static URL_RE: OnceLock<Regex> = OnceLock::new();

/// 按顺序匹配；靠前的类型优先
fn keyword_patterns() -> &'static [(ActionType, Regex)] {
    KEYWORD_RES.get_or_init(|| {
        [
            (ActionType::Reflect, r"(?i)\b(reflect\w*|reconsider|reassess\w*|review progress)\b"),
            (ActionType::Synthesize, r"(?i)\b(synthes\w*|summar\w*|compile|conclu\w*|draft|write up|report)\b"),
            (ActionType::Analyze, r"(?i)\b(analy\w*|compar\w*|evaluat\w*|extract\w*|examin\w*|assess\w*)\b"),
            (ActionType::Fetch, r"(?i)\b(fetch\w*|read|download\w*|retriev\w*|scrap\w*|open|full content)\b"),
            (ActionType::Search, r"(?i)\b(search\w*|find|look up|query|discover)\b"),
        ]
        .into_iter()
        .map(|(t, p)| (t, Regex::new(p).unwrap()))
        .collect()
    })
}

/// 由候选行动描述推断类型：先看开头的动词，再按关键词优先级；都不匹配时为 search
pub fn infer_action_type(text: &str) -> ActionType {
    let leading = text.len() - text.trim_start().len();
    let patterns = keyword_patterns();
    patterns
        .iter()
        .find(|(_, re)| re.find(text).is_some_and(|m| m.start() == leading))
        .or_else(|| patterns.iter().find(|(_, re)| re.is_match(text)))
        .map(|(t, _)| *t)
        .unwrap_or(ActionType::Search)
}

/// 文本中出现的 http(s) 链接（去重，保持顺序）
pub fn extract_urls(text: &str) -> Vec<String> {
    let re = URL_RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>()\[\]]+"#).unwrap());
    dedup_preserving(
        re.find_iter(text)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string()),
    )
}

/// 各工具的默认参数
pub fn default_parameters(action_type: ActionType, state: &AgentState) -> Value {
    let wm = &state.working_memory;
    match action_type {
        ActionType::Search => json!({ "query": state.goal.description }),
        ActionType::Fetch => {
            let urls: Vec<String> = wm
                .successful_results_of(ActionType::Search)
                .iter()
                .flat_map(|o| extract_urls(&o.result_text()))
                .collect();
            let mut urls = dedup_preserving(urls);
            urls.truncate(MAX_URLS);
            json!({ "urls": urls })
        }
        ActionType::Analyze => {
            let fetched: Vec<String> = wm
                .successful_results_of(ActionType::Fetch)
                .iter()
                .map(|o| o.result_text())
                .filter(|t| !t.is_empty())
                .collect();
            let content = if fetched.is_empty() {
                wm.key_findings.join("\n")
            } else {
                fetched.join("\n\n")
            };
            json!({ "content": content })
        }
        ActionType::Synthesize => json!({
            "findings": wm.key_findings,
            "goal": state.goal.description,
        }),
        ActionType::Reflect => json!({}),
    }
}

pub fn build_action(option: &ActionOption, state: &AgentState) -> Action {
    let action_type = infer_action_type(&option.action);
    let reasoning = if option.rationale.is_empty() {
        option.action.clone()
    } else {
        format!("{}: {}", option.action, option.rationale)
    };
    Action::new(action_type, default_parameters(action_type, state), reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Goal, Outcome};

    #[test]
    fn test_infer_action_type() {
        assert_eq!(infer_action_type("fetch full content of gathered sources"), ActionType::Fetch);
        assert_eq!(infer_action_type("Synthesize findings into an answer"), ActionType::Synthesize);
        assert_eq!(infer_action_type("compare the two runtimes"), ActionType::Analyze);
        assert_eq!(infer_action_type("reflect on progress"), ActionType::Reflect);
        assert_eq!(infer_action_type("look up tokio benchmarks"), ActionType::Search);
        assert_eq!(infer_action_type("something else entirely"), ActionType::Search);
    }

    #[test]
    fn test_leading_verb_wins_over_keywords() {
        assert_eq!(infer_action_type("search for benchmark reports"), ActionType::Search);
        assert_eq!(
            infer_action_type("  Search for articles comparing tokio and smol"),
            ActionType::Search
        );
        assert_eq!(infer_action_type("read the report on scheduler latency"), ActionType::Fetch);
        assert_eq!(infer_action_type("then summarize and compare results"), ActionType::Synthesize);
    }

    #[test]
    fn test_extract_urls() {
        let text = "see https://a.dev/x, and (http://b.org/y). again https://a.dev/x";
        assert_eq!(extract_urls(text), vec!["https://a.dev/x", "http://b.org/y"]);
    }

    #[test]
    fn test_fetch_params_use_search_results() {
        let mut state = AgentState::new(Goal::new("rust runtimes"));
        let a = Action::new(ActionType::Search, json!({}), "");
        let o = Outcome::success(&a.id, json!("1. https://tokio.rs 2. https://async.rs"));
        state.record_iteration(a, o);

        let params = default_parameters(ActionType::Fetch, &state);
        assert_eq!(params["urls"], json!(["https://tokio.rs", "https://async.rs"]));
        assert_eq!(
            default_parameters(ActionType::Search, &state)["query"],
            "rust runtimes"
        );
    }

    #[test]
    fn test_analyze_params_fall_back_to_findings() {
        let mut state = AgentState::new(Goal::new("g"));
        state.working_memory.add_finding("tokio is multi-threaded");
        assert_eq!(
            default_parameters(ActionType::Analyze, &state)["content"],
            "tokio is multi-threaded"
        );

        let a = Action::new(ActionType::Fetch, json!({}), "");
        let o = Outcome::success(&a.id, json!("page body"));
        state.record_iteration(a, o);
        assert_eq!(default_parameters(ActionType::Analyze, &state)["content"], "page body");
    }

    #[test]
    fn test_build_action() {
        let state = AgentState::new(Goal::new("g"));
        let option = ActionOption {
            action: "fetch full content".into(),
            rationale: "sources pending".into(),
            expected_benefit: String::new(),
            potential_risks: vec![],
            estimated_cost: 4.0,
            confidence: 0.3,
        };
        let action = build_action(&option, &state);
        assert_eq!(action.action_type, ActionType::Fetch);
        assert_eq!(action.tool, "fetch_content");
        assert_eq!(action.reasoning, "fetch full content: sources pending");
    }
}
