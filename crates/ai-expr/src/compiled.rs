use ai_core::{Value, VariableLookup};

use crate::ast::Expr;
use crate::error::Result;
use crate::eval::{self, EvalEnv};
use crate::parser;

/// A parsed expression, ready to evaluate any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    source: String,
    ast: Expr,
}

impl CompiledExpression {
    /// Parse `source`, accepting either a bare body or a `${...}` wrapper.
    pub fn parse(source: &str) -> Result<Self> {
        let ast = parser::parse(strip_wrapper(source))?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Root variable names this expression reads.
    pub fn variables(&self) -> Vec<&str> {
        self.ast.variables()
    }

    /// Evaluate with a throwaway environment (seed 0, wall clock).
    pub fn evaluate(&self, scope: &dyn VariableLookup) -> Result<Value> {
        self.evaluate_with(scope, &mut EvalEnv::default())
    }

    pub fn evaluate_with(&self, scope: &dyn VariableLookup, env: &mut EvalEnv) -> Result<Value> {
        eval::evaluate(&self.ast, scope, env)
    }
}

/// `${ body }` -> `body`; anything else is returned unchanged.
pub(crate) fn strip_wrapper(source: &str) -> &str {
    let trimmed = source.trim();
    match trimmed.strip_prefix("${") {
        Some(inner) if crate::template::find_close(trimmed, 2) == Some(trimmed.len() - 1) => {
            inner[..inner.len() - 1].trim()
        }
        _ => trimmed,
    }
}
