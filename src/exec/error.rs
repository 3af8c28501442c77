//! Runtime errors raised by the interpreter and scheduler.

use thiserror::Error;

use crate::core::BehaviorError;

/// Errors surfaced by `start`, `send`, `invoke` and `terminate`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("machine is not running")]
    NotRunning,

    #[error("machine was already started")]
    AlreadyStarted,

    #[error("machine stopped while the operation was pending")]
    Interrupted,

    #[error("no enabled branch at '{path}'")]
    NoEnabledBranch { path: String },

    #[error("history '{path}' has no saved configuration and no default transition")]
    NoHistoryDefault { path: String },

    #[error("event '{path}' does not wrap an operation")]
    NoOperation { path: String },

    #[error("behavior failed: {0}")]
    Behavior(#[from] BehaviorError),
}
