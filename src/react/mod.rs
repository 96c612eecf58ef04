//! 推理层：Planner 生成并选择候选行动，Critic 观察结果，ReasoningEngine 串联 reason / observe

pub mod action;
pub mod critic;
pub mod engine;
pub mod fallback;
pub mod planner;

pub use action::{build_action, default_parameters, infer_action_type};
pub use critic::Critic;
pub use engine::{Observation, ReasoningEngine, ReasoningResult};
pub use fallback::{fallback_option, FALLBACK_CONFIDENCE};
pub use planner::{option_score, select_option, ActionOption, Planner, ReasoningContext};
