use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error taxonomy shared by every subsystem.
///
/// Codes are what callers match on and what document-level `errors` tables are keyed by
/// (see [`ErrorCode::as_str`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    CompileError,
    UndefinedVariable,
    TypeMismatch,
    UnknownActionType,
    ActionHandlerFailure,
    DeadlockDetected,
    StalledExecution,
    Cancelled,
    PlanNotFound,
    PreconditionInvalidated,
    DeadlineExceeded,
    CallDepthExceeded,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 12] = [
        ErrorCode::CompileError,
        ErrorCode::UndefinedVariable,
        ErrorCode::TypeMismatch,
        ErrorCode::UnknownActionType,
        ErrorCode::ActionHandlerFailure,
        ErrorCode::DeadlockDetected,
        ErrorCode::StalledExecution,
        ErrorCode::Cancelled,
        ErrorCode::PlanNotFound,
        ErrorCode::PreconditionInvalidated,
        ErrorCode::DeadlineExceeded,
        ErrorCode::CallDepthExceeded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::CompileError => "compile_error",
            ErrorCode::UndefinedVariable => "undefined_variable",
            ErrorCode::TypeMismatch => "type_mismatch",
            ErrorCode::UnknownActionType => "unknown_action_type",
            ErrorCode::ActionHandlerFailure => "action_handler_failure",
            ErrorCode::DeadlockDetected => "deadlock_detected",
            ErrorCode::StalledExecution => "stalled_execution",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::PlanNotFound => "plan_not_found",
            ErrorCode::PreconditionInvalidated => "precondition_invalidated",
            ErrorCode::DeadlineExceeded => "deadline_exceeded",
            ErrorCode::CallDepthExceeded => "call_depth_exceeded",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.as_str() == name)
    }

    /// Errors that an action-level `on_error` block is allowed to intercept.
    pub fn is_action_recoverable(self) -> bool {
        matches!(
            self,
            ErrorCode::ActionHandlerFailure | ErrorCode::TypeMismatch | ErrorCode::UndefinedVariable
        )
    }

    /// Errors that terminate the whole execution rather than a single channel.
    pub fn is_execution_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::DeadlockDetected
                | ErrorCode::StalledExecution
                | ErrorCode::Cancelled
                | ErrorCode::DeadlineExceeded
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by scope access.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("undefined variable: {path}")]
    UndefinedVariable { path: String },

    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("scope layer is read-only: {path}")]
    ReadOnlyScope { path: String },

    #[error("invalid variable path: {path:?}")]
    InvalidPath { path: String },
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::UndefinedVariable { .. } => ErrorCode::UndefinedVariable,
            CoreError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            CoreError::ReadOnlyScope { .. } | CoreError::InvalidPath { .. } => {
                ErrorCode::TypeMismatch
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
