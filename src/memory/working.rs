//! 工作记忆：最近的行动/结果、关键发现、待解决问题
//!
//! 在单个会话内有效，随 AgentState 一起持久化；用于拼入推理 prompt、判断连续失败与反思触发。

use serde::{Deserialize, Serialize};

use crate::core::state::{Action, ActionType, Outcome};

const DEFAULT_CAPACITY: usize = 20;

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemory {
    #[serde(default)]
    pub recent_actions: Vec<Action>,
    #[serde(default)]
    pub recent_outcomes: Vec<Outcome>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    /// 保留的 action/outcome 对数
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self {
            recent_actions: Vec::new(),
            recent_outcomes: Vec::new(),
            key_findings: Vec::new(),
            open_questions: Vec::new(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ..Self::default()
        }
    }

    /// 记录一对 action / outcome，超出容量时丢弃最旧的
    pub fn record(&mut self, action: Action, outcome: Outcome) {
        self.recent_actions.push(action);
        self.recent_outcomes.push(outcome);
        if self.recent_actions.len() > self.capacity {
            let excess = self.recent_actions.len() - self.capacity;
            self.recent_actions.drain(..excess);
        }
        if self.recent_outcomes.len() > self.capacity {
            let excess = self.recent_outcomes.len() - self.capacity;
            self.recent_outcomes.drain(..excess);
        }
    }

    pub fn add_finding(&mut self, finding: impl Into<String>) {
        let finding = finding.into();
        let finding = finding.trim();
        if !finding.is_empty() && !self.key_findings.iter().any(|f| f == finding) {
            self.key_findings.push(finding.to_string());
        }
    }

    pub fn add_question(&mut self, question: impl Into<String>) {
        let question = question.into();
        let question = question.trim();
        if !question.is_empty() && !self.open_questions.iter().any(|q| q == question) {
            self.open_questions.push(question.to_string());
        }
    }

    pub fn resolve_question(&mut self, question: &str) -> bool {
        let before = self.open_questions.len();
        self.open_questions.retain(|q| q != question);
        before != self.open_questions.len()
    }

    /// 最近 n 个 outcome（时间顺序）
    pub fn last_outcomes(&self, n: usize) -> &[Outcome] {
        let start = self.recent_outcomes.len().saturating_sub(n);
        &self.recent_outcomes[start..]
    }

    /// 最近 n 对 action / outcome（按 action_id 配对，无结果的 action 跳过）
    pub fn last_pairs(&self, n: usize) -> Vec<(&Action, &Outcome)> {
        let mut pairs: Vec<(&Action, &Outcome)> = self
            .recent_actions
            .iter()
            .rev()
            .filter_map(|a| {
                self.recent_outcomes
                    .iter()
                    .rev()
                    .find(|o| o.action_id == a.id)
                    .map(|o| (a, o))
            })
            .take(n)
            .collect();
        pairs.reverse();
        pairs
    }

    /// 最近 n 个 outcome 中失败的个数
    pub fn failures_in_last(&self, n: usize) -> usize {
        self.last_outcomes(n).iter().filter(|o| !o.success).count()
    }

    /// 指定类型的最近成功结果（新的在前）
    pub fn successful_results_of(&self, action_type: ActionType) -> Vec<&Outcome> {
        self.last_pairs(self.capacity)
            .into_iter()
            .rev()
            .filter(|(a, o)| a.action_type == action_type && o.success)
            .map(|(_, o)| o)
            .collect()
    }

    /// 本会话使用过的工具名（去重，保持首次出现顺序）
    pub fn tool_names_used(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for a in &self.recent_actions {
            if !names.contains(&a.tool) {
                names.push(a.tool.clone());
            }
        }
        names
    }
}

/// 按字符截断（UTF-8 安全）
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head.trim_end())
}
