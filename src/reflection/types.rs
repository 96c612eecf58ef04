//! 反思记录及其组成部分

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 策略评估后的建议
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Continue,
    Adjust,
    Change,
}

impl Recommendation {
    /// ≥ 0.7 continue，≥ 0.4 adjust，否则 change
    pub fn from_effectiveness(effectiveness: f64) -> Self {
        if effectiveness >= 0.7 {
            Recommendation::Continue
        } else if effectiveness >= 0.4 {
            Recommendation::Adjust
        } else {
            Recommendation::Change
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Continue => "continue",
            Recommendation::Adjust => "adjust",
            Recommendation::Change => "change",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressAssessment {
    pub is_on_track: bool,
    /// 每分钟完成的步骤数
    pub progress_rate: f64,
    pub estimated_completion: Option<DateTime<Utc>>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub achievements: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyEvaluation {
    /// 最近 action / outcome 的成功比例
    pub effectiveness: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub alternative_strategies: Vec<String>,
    pub recommendation: Recommendation,
}

/// 一次反思的完整结果；写入会话后只追加不修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub id: String,
    pub session_id: String,
    pub iteration_number: u32,
    pub timestamp: DateTime<Utc>,
    pub action_summary: String,
    pub outcome_summary: String,
    pub progress_assessment: ProgressAssessment,
    pub strategy_evaluation: StrategyEvaluation,
    #[serde(default)]
    pub learnings: Vec<String>,
    pub should_replan: bool,
    #[serde(default)]
    pub adjustments: Vec<String>,
    pub next_focus: String,
    #[serde(default)]
    pub knowledge_gaps: Vec<String>,
    /// 综合阶段不可用，学习内容为通用占位
    #[serde(default)]
    pub degraded: bool,
}

/// 反思前对近期记忆的模式分析
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatternAnalysis {
    /// 在多个 episode 主题中反复出现的关键词及次数
    pub topic_patterns: Vec<(String, usize)>,
    /// 成功率 ≥ 0.7 的策略
    pub reliable_strategies: Vec<String>,
    /// 成功率 < 0.4 的策略
    pub struggling_strategies: Vec<String>,
    pub episode_count: usize,
    pub fact_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommendation_bands() {
        assert_eq!(Recommendation::from_effectiveness(0.9), Recommendation::Continue);
        assert_eq!(Recommendation::from_effectiveness(0.7), Recommendation::Continue);
        assert_eq!(Recommendation::from_effectiveness(0.5), Recommendation::Adjust);
        assert_eq!(Recommendation::from_effectiveness(0.4), Recommendation::Adjust);
        assert_eq!(Recommendation::from_effectiveness(0.1), Recommendation::Change);
    }
}
