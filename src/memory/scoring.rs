//! 多因子打分：检索排序、相关度衰减与策略推荐使用的纯函数
//!
//! 权重集中在这里，调整权重不需要改动检索或存储代码。

/// episode 排序：0.7 · 相关度名次 + 0.3 · exp(-ageDays / 7)
pub const EPISODE_RELEVANCE_WEIGHT: f64 = 0.7;
pub const EPISODE_RECENCY_WEIGHT: f64 = 0.3;
pub const EPISODE_RECENCY_DAYS: f64 = 7.0;

/// fact 排序：0.5 · confidence + 0.3 · exp(-ageDays / 30) + 0.2 · min(accessCount / 10, 1)
pub const FACT_CONFIDENCE_WEIGHT: f64 = 0.5;
pub const FACT_RECENCY_WEIGHT: f64 = 0.3;
pub const FACT_ACCESS_WEIGHT: f64 = 0.2;
pub const FACT_RECENCY_DAYS: f64 = 30.0;
pub const FACT_ACCESS_SATURATION: f64 = 10.0;

/// 相关度衰减时间常数（天）
pub const RELEVANCE_DECAY_DAYS: f64 = 60.0;
pub const ACCESS_BOOST_PER_HIT: f64 = 0.01;
pub const ACCESS_BOOST_CAP: f64 = 0.2;

/// 策略推荐权重
pub const STRATEGY_SUCCESS_WEIGHT: f64 = 0.40;
pub const STRATEGY_EXPERIENCE_WEIGHT: f64 = 0.25;
pub const STRATEGY_TOOLS_WEIGHT: f64 = 0.20;
pub const STRATEGY_RECENCY_WEIGHT: f64 = 0.15;
pub const STRATEGY_EXPERIENCE_SATURATION: f64 = 20.0;
pub const STRATEGY_RECENCY_DAYS: f64 = 30.0;
pub const MISSING_TOOL_PENALTY: f64 = 0.2;

/// 检索结果第 position 名（0 起）在 total 个结果中的名次分：1 - position / total
pub fn relevance_rank(position: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    1.0 - position as f64 / total as f64
}

/// 指数新近度：exp(-age / tau)，age 为负时按 0 处理
pub fn recency(age_days: f64, tau_days: f64) -> f64 {
    (-age_days.max(0.0) / tau_days).exp()
}

pub fn episode_score(relevance_rank: f64, age_days: f64) -> f64 {
    EPISODE_RELEVANCE_WEIGHT * relevance_rank
        + EPISODE_RECENCY_WEIGHT * recency(age_days, EPISODE_RECENCY_DAYS)
}

pub fn fact_score(confidence: f64, age_days: f64, access_count: u32) -> f64 {
    FACT_CONFIDENCE_WEIGHT * confidence
        + FACT_RECENCY_WEIGHT * recency(age_days, FACT_RECENCY_DAYS)
        + FACT_ACCESS_WEIGHT * (access_count as f64 / FACT_ACCESS_SATURATION).min(1.0)
}

/// relevance' = min(relevance · exp(-daysSinceAccess / 60) + min(accessCount · 0.01, 0.2), 1.0)，下限 0
pub fn decayed_relevance(relevance: f64, days_since_access: f64, access_count: u32) -> f64 {
    let decayed = relevance * recency(days_since_access, RELEVANCE_DECAY_DAYS);
    let boost = (access_count as f64 * ACCESS_BOOST_PER_HIT).min(ACCESS_BOOST_CAP);
    (decayed + boost).clamp(0.0, 1.0)
}

/// 缺失工具为 0 时 1，否则 max(0, 1 - 0.2 · missing)
pub fn tool_availability(missing_tools: usize) -> f64 {
    if missing_tools == 0 {
        1.0
    } else {
        (1.0 - MISSING_TOOL_PENALTY * missing_tools as f64).max(0.0)
    }
}

pub fn strategy_score(
    success_rate: f64,
    times_used: u32,
    missing_tools: usize,
    days_since_last_use: f64,
) -> f64 {
    STRATEGY_SUCCESS_WEIGHT * success_rate
        + STRATEGY_EXPERIENCE_WEIGHT
            * (times_used as f64 / STRATEGY_EXPERIENCE_SATURATION).min(1.0)
        + STRATEGY_TOOLS_WEIGHT * tool_availability(missing_tools)
        + STRATEGY_RECENCY_WEIGHT * recency(days_since_last_use, STRATEGY_RECENCY_DAYS)
}

/// 增量均值：(mean · n + x) / (n + 1)
pub fn running_average(mean: f64, count: u32, sample: f64) -> f64 {
    (mean * count as f64 + sample) / (count as f64 + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevance_rank() {
        assert_eq!(relevance_rank(0, 4), 1.0);
        assert_eq!(relevance_rank(2, 4), 0.5);
        assert_eq!(relevance_rank(0, 0), 0.0);
    }

    #[test]
    fn test_episode_score_fresh_top_result() {
        assert!((episode_score(1.0, 0.0) - 1.0).abs() < 1e-9);
        assert!(episode_score(1.0, 30.0) < episode_score(1.0, 1.0));
    }

    #[test]
    fn test_fact_score_components() {
        let s = fact_score(1.0, 0.0, 10);
        assert!((s - 1.0).abs() < 1e-9);
        // 访问次数饱和
        assert_eq!(fact_score(0.5, 3.0, 10), fact_score(0.5, 3.0, 50));
    }

    #[test]
    fn test_decay_monotonic_and_bounded() {
        let mut prev = f64::MAX;
        for days in [0.0, 1.0, 5.0, 30.0, 60.0, 365.0] {
            let r = decayed_relevance(0.8, days, 3);
            assert!(r < prev, "decay must strictly decrease");
            assert!((0.0..=1.0).contains(&r));
            prev = r;
        }
    }

    #[test]
    fn test_decay_boost_capped() {
        let r = decayed_relevance(0.95, 0.0, 1000);
        assert_eq!(r, 1.0);
        let r = decayed_relevance(0.0, 10.0, 1000);
        assert!((r - ACCESS_BOOST_CAP).abs() < 1e-9);
    }

    #[test]
    fn test_tool_availability() {
        assert_eq!(tool_availability(0), 1.0);
        assert!((tool_availability(2) - 0.6).abs() < 1e-9);
        assert_eq!(tool_availability(7), 0.0);
    }

    #[test]
    fn test_strategy_score_perfect() {
        let s = strategy_score(1.0, 20, 0, 0.0);
        assert!((s - 1.0).abs() < 1e-9);
        assert!(strategy_score(1.0, 20, 1, 0.0) < s);
    }

    #[test]
    fn test_running_average_matches_mean() {
        let samples = [1.0, 0.0, 1.0, 1.0, 0.0];
        let mut mean = 0.0;
        for (i, x) in samples.iter().enumerate() {
            mean = running_average(mean, i as u32, *x);
        }
        assert!((mean - 0.6).abs() < 1e-12);
    }
}
