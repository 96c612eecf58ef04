//! 核心层：错误分类、Agent 状态、研究会话

pub mod error;
pub mod session;
pub mod state;

pub use error::{AgentError, AgentResult, ErrorClass};
pub use session::{Session, SessionManager, SessionStatus};
pub use state::{
    Action, ActionType, AgentState, Complexity, Goal, Outcome, Phase, Plan, PlanStep, Progress,
    StepStatus,
};
