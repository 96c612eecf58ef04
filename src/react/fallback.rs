//! LLM 不可用时的确定性行动选择
//!
//! 只看 (sources_gathered, facts_extracted, phase)，相同输入必得相同输出。

use crate::core::state::{Phase, Progress};
use crate::react::planner::ActionOption;

/// 降级候选的固定置信度
pub const FALLBACK_CONFIDENCE: f64 = 0.3;
const SYNTHESIZE_AFTER_FACTS: u32 = 3;

/// 决策表：
/// - 没有来源 → search
/// - 有来源但没有事实 → fetch 全文
/// - 事实 > 3 → synthesize
/// - 其余 → search
pub fn fallback_option(progress: &Progress) -> ActionOption {
    let (action, rationale, cost) = if progress.sources_gathered == 0 {
        ("search for sources on the goal", "no sources gathered yet", 3.0)
    } else if progress.facts_extracted == 0 {
        (
            "fetch full content of gathered sources",
            "sources exist but no facts were extracted from them",
            4.0,
        )
    } else if progress.facts_extracted > SYNTHESIZE_AFTER_FACTS {
        (
            "synthesize findings into an answer",
            "enough facts collected to synthesize",
            5.0,
        )
    } else {
        ("search for additional sources", "more evidence needed", 3.0)
    };

    let rationale = if progress.phase == Phase::Completed {
        format!("{} (research already marked completed)", rationale)
    } else {
        format!("{} during {}", rationale, progress.phase)
    };

    ActionOption {
        action: action.to_string(),
        rationale,
        expected_benefit: "keeps the research moving while the planner is unavailable".to_string(),
        potential_risks: vec!["heuristic choice without model guidance".to_string()],
        estimated_cost: cost,
        confidence: FALLBACK_CONFIDENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(sources: u32, facts: u32) -> Progress {
        Progress {
            sources_gathered: sources,
            facts_extracted: facts,
            ..Progress::default()
        }
    }

    #[test]
    fn test_decision_table() {
        assert!(fallback_option(&progress(0, 0)).action.starts_with("search"));
        assert!(fallback_option(&progress(10, 0)).action.starts_with("fetch"));
        assert!(fallback_option(&progress(5, 4)).action.starts_with("synthesize"));
        assert!(fallback_option(&progress(5, 3)).action.starts_with("search"));
    }

    #[test]
    fn test_deterministic() {
        let p = Progress {
            sources_gathered: 2,
            facts_extracted: 1,
            phase: Phase::Analyzing,
            ..Progress::default()
        };
        assert_eq!(fallback_option(&p), fallback_option(&p));
        assert_eq!(fallback_option(&p).confidence, FALLBACK_CONFIDENCE);
    }
}
