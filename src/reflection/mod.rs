//! 反思：定期回顾经验，评估进度与策略，产出调整建议

pub mod engine;
pub mod policy;
pub mod types;

pub use engine::{analyze_patterns, assess_progress, strategy_effectiveness, ReflectionEngine};
pub use policy::{adjustments, trigger, BehaviorAdjustment, ReflectionPolicy, TriggerReason};
pub use types::{PatternAnalysis, ProgressAssessment, Recommendation, Reflection, StrategyEvaluation};
