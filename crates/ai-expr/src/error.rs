use ai_core::ErrorCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("syntax error in `{expression}` at offset {position}: {message}")]
    Syntax {
        expression: String,
        position: usize,
        message: String,
    },

    #[error("unknown function `{name}` in `{expression}`")]
    UnknownFunction { name: String, expression: String },

    #[error("function `{name}` expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("undefined variable: {path}")]
    UndefinedVariable { path: String },

    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("arithmetic error: {message}")]
    Arithmetic { message: String },
}

impl ExprError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ExprError::Syntax { .. } | ExprError::UnknownFunction { .. } | ExprError::Arity { .. } => {
                ErrorCode::CompileError
            }
            ExprError::UndefinedVariable { .. } => ErrorCode::UndefinedVariable,
            ExprError::TypeMismatch { .. } | ExprError::Arithmetic { .. } => ErrorCode::TypeMismatch,
        }
    }

    pub(crate) fn mismatch(message: impl Into<String>) -> Self {
        ExprError::TypeMismatch {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExprError>;
