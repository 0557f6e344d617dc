use ai_core::ErrorCode;
use thiserror::Error;

use crate::world::WorldKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GoapError {
    #[error("type mismatch on `{key}`: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: WorldKind,
        found: WorldKind,
    },

    #[error("invalid condition {input:?}: {reason}")]
    InvalidCondition { input: String, reason: String },

    #[error("invalid effect {input:?}: {reason}")]
    InvalidEffect { input: String, reason: String },

    #[error("action `{action}` has negative cost {cost}")]
    NegativeCost { action: String, cost: f64 },
}

impl GoapError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GoapError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            GoapError::InvalidCondition { .. }
            | GoapError::InvalidEffect { .. }
            | GoapError::NegativeCost { .. } => ErrorCode::CompileError,
        }
    }
}

pub type Result<T> = std::result::Result<T, GoapError>;
