use std::fmt;

use ai_core::{CoreError, ErrorCode};
use ai_expr::ExprError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A compile problem with the document location it was found at (`flows.start[2].then[0]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub location: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced before execution starts, or by registry misuse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AbmlError {
    #[error("failed to parse document: {message}")]
    Parse { message: String },

    #[error("document `{document_id}` failed to compile: {}", render_diagnostics(.diagnostics))]
    Compile {
        document_id: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("unknown action type `{action_type}`")]
    UnknownActionType { action_type: String },

    #[error("`{action_type}` is handled by the executor and cannot be registered")]
    ReservedActionType { action_type: String },

    #[error("invalid plan request: {message}")]
    PlanRequest { message: String },

    #[error(transparent)]
    Goap(#[from] ai_goap::GoapError),
}

impl AbmlError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AbmlError::Parse { .. }
            | AbmlError::Compile { .. }
            | AbmlError::ReservedActionType { .. } => ErrorCode::CompileError,
            AbmlError::UnknownActionType { .. } => ErrorCode::UnknownActionType,
            AbmlError::PlanRequest { .. } => ErrorCode::TypeMismatch,
            AbmlError::Goap(err) => err.code(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            AbmlError::Compile { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, AbmlError>;

/// A runtime failure as reported in an execution result.
///
/// `handled` is set when an `on_error` block or the document `errors` table took over; such
/// errors are still reported so callers can see them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: ErrorCode,
    pub message: String,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub handled: bool,
}

impl ExecutionError {
    pub fn new(code: ErrorCode, message: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            document_id: document_id.into(),
            channel: None,
            action: None,
            handled: false,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// The value bound to `error` while a handler runs.
    pub fn to_value(&self) -> ai_core::Value {
        ai_core::Value::map()
            .with("code", self.code.as_str())
            .with("message", self.message.clone())
            .with("action", self.action.clone().unwrap_or_default())
            .with("channel", self.channel.clone().unwrap_or_default())
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(channel) = &self.channel {
            write!(f, " (channel `{channel}`")?;
            if let Some(action) = &self.action {
                write!(f, " at {action}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Step-level failure before channel and document context are attached.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StepError {
    pub code: ErrorCode,
    pub message: String,
}

impl StepError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ExprError> for StepError {
    fn from(err: ExprError) -> Self {
        StepError::new(err.code(), err.to_string())
    }
}

impl From<CoreError> for StepError {
    fn from(err: CoreError) -> Self {
        StepError::new(err.code(), err.to_string())
    }
}
