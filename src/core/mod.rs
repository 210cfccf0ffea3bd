//! 核心编排层：状态机、错误与恢复、进度事件、会话监管、主控编排与构建

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_llm_from_config, OrchestratorBuilder};
pub use error::{DiscoveryError, OrchestratorError, RecoveryAction};
pub use orchestrator::{Orchestrator, OrchestratorOptions, TurnOutcome};
pub use progress::{ProgressEvent, ProgressSink};
pub use recovery::RecoveryEngine;
pub use session_supervisor::{ActiveRequest, SessionSupervisor};
pub use state::{OrchestrationState, Phase, StateUpdate, Transition};
