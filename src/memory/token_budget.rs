//! Token 预算控制
//!
//! 为检索上下文设置 token 上限：三类记忆按比例分预算，每类内部按得分贪心填充。

use crate::config::MemorySection;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut tokens = 0;
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        // 英文按 4 字符/token，中文按 1.5 字符/token
        tokens += ascii_chars / 4;
        tokens += (non_ascii_chars as f64 / 1.5).ceil() as usize;

        tokens.max(1)
    }
}

/// 三类记忆的预算比例
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetSplit {
    pub episodic: f64,
    pub semantic: f64,
    pub procedural: f64,
}

impl Default for BudgetSplit {
    fn default() -> Self {
        Self {
            episodic: 0.4,
            semantic: 0.4,
            procedural: 0.2,
        }
    }
}

impl BudgetSplit {
    pub fn new(episodic: f64, semantic: f64, procedural: f64) -> Self {
        Self {
            episodic,
            semantic,
            procedural,
        }
    }

    pub fn from_config(config: &MemorySection) -> Self {
        Self::new(
            config.episodic_share,
            config.semantic_share,
            config.procedural_share,
        )
    }

    /// 把总预算拆成 (episodic, semantic, procedural)；比例和不为 1 时先归一化，负值按 0
    pub fn allocate(&self, total: usize) -> (usize, usize, usize) {
        let e = self.episodic.max(0.0);
        let s = self.semantic.max(0.0);
        let p = self.procedural.max(0.0);
        let sum = e + s + p;
        if sum <= 0.0 {
            return Self::default().allocate(total);
        }
        let share = |x: f64| ((total as f64) * x / sum).floor() as usize;
        (share(e), share(s), share(p))
    }
}

/// 贪心填充结果
#[derive(Debug, Clone)]
pub struct BudgetSelection<T> {
    pub selected: Vec<T>,
    /// 已选条目渲染后的完整文本
    pub text: String,
    /// text 的估算 token 数（含分隔符与标题）
    pub used_tokens: usize,
    /// 至少有一个候选因预算不足被排除
    pub truncated: bool,
}

/// 按给定顺序贪心填充，每加入一个候选都重新渲染整段文本并估算；
/// 遇到第一个放不下的候选即停止并标记 truncated
pub fn greedy_fill<T, F>(candidates: Vec<T>, max_tokens: usize, render: F) -> BudgetSelection<T>
where
    F: Fn(&[T]) -> String,
{
    let mut selected = Vec::new();
    let mut text = String::new();
    let mut used_tokens = 0;
    let mut truncated = false;

    for candidate in candidates {
        selected.push(candidate);
        let next = render(&selected);
        let cost = TokenEstimator::estimate(&next);
        if cost > max_tokens {
            selected.pop();
            truncated = true;
            break;
        }
        text = next;
        used_tokens = cost;
    }

    BudgetSelection {
        selected,
        text,
        used_tokens,
        truncated,
    }
}

/// 逐条渲染后用 separator 连接
pub fn join_rendered<T>(items: &[T], separator: &str, render: impl Fn(&T) -> String) -> String {
    items.iter().map(render).collect::<Vec<_>>().join(separator)
}
