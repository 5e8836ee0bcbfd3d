//! 实时会话

pub mod orchestrator;
pub mod protocol;

pub use orchestrator::{SessionDeps, SessionOrchestrator, SessionSummary};
pub use protocol::{ClientFrame, ClientMessage, ControlAction, ServerFrame, ServerMessage};
