//! 核心层：错误与恢复、状态定义、会话监管、装配与主控任务

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{
    build_controller, build_registry, create_agent, create_llm_from_config, Command,
};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{ControllerPhase, ControllerStatus, ExecutionMode, PendingConfirmation, TurnCounters};
