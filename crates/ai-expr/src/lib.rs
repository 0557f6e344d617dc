//! `${...}` expression language: lexer, parser, evaluator, compile cache and parameter
//! templates.
//!
//! Compilation is pure and cached by exact source text; evaluation reads a
//! [`ai_core::VariableLookup`] and never writes to it.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod ast;
pub mod cache;
mod compiled;
pub mod error;
mod eval;
pub mod functions;
mod lexer;
mod parser;
pub mod template;

pub use cache::{compile, global, ExpressionCache};
pub use compiled::CompiledExpression;
pub use error::{ExprError, Result};
pub use eval::{values_equal, EvalEnv};
pub use template::{Fragment, Template};
