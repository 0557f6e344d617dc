//! Parameter templates: strings with embedded `${...}` expressions, nested inside lists and maps.

use std::collections::BTreeMap;
use std::sync::Arc;

use ai_core::{Value, VariableLookup};

use crate::cache::ExpressionCache;
use crate::compiled::CompiledExpression;
use crate::error::{ExprError, Result};
use crate::eval::EvalEnv;

#[derive(Debug, Clone)]
pub enum Fragment {
    Text(String),
    Expression(Arc<CompiledExpression>),
}

#[derive(Debug, Clone)]
pub enum Template {
    Literal(Value),
    /// The whole string is one `${...}`; renders to the expression's typed value.
    Expression(Arc<CompiledExpression>),
    /// Text mixed with expressions; renders to a string.
    Interpolated(Vec<Fragment>),
    List(Vec<Template>),
    Map(BTreeMap<String, Template>),
}

impl Template {
    pub fn compile(value: &Value, cache: &ExpressionCache) -> Result<Self> {
        let template = match value {
            Value::String(s) => Self::compile_str(s, cache)?,
            Value::List(items) => {
                let items = items
                    .iter()
                    .map(|item| Self::compile(item, cache))
                    .collect::<Result<Vec<_>>>()?;
                if items.iter().all(Template::is_static) {
                    Template::Literal(value.clone())
                } else {
                    Template::List(items)
                }
            }
            Value::Map(entries) => {
                let entries = entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::compile(v, cache)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                if entries.values().all(Template::is_static) {
                    Template::Literal(value.clone())
                } else {
                    Template::Map(entries)
                }
            }
            other => Template::Literal(other.clone()),
        };
        Ok(template)
    }

    pub fn compile_str(source: &str, cache: &ExpressionCache) -> Result<Self> {
        if !source.contains("${") {
            return Ok(Template::Literal(Value::String(source.to_string())));
        }

        let mut fragments = Vec::new();
        let mut text = String::new();
        let mut i = 0;
        while let Some(found) = source[i..].find("${") {
            let open = i + found;
            text.push_str(&source[i..open]);
            let close = find_close(source, open + 2).ok_or_else(|| ExprError::Syntax {
                expression: source.to_string(),
                position: open,
                message: "unterminated `${`".to_string(),
            })?;
            if !text.is_empty() {
                fragments.push(Fragment::Text(std::mem::take(&mut text)));
            }
            fragments.push(Fragment::Expression(cache.compile(&source[open..=close])?));
            i = close + 1;
        }
        text.push_str(&source[i..]);
        if !text.is_empty() {
            fragments.push(Fragment::Text(text));
        }

        match fragments.as_slice() {
            [Fragment::Expression(expr)] => Ok(Template::Expression(Arc::clone(expr))),
            _ => Ok(Template::Interpolated(fragments)),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Template::Literal(_))
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Template::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Every compiled expression in this template, depth first.
    pub fn expressions(&self) -> Vec<&Arc<CompiledExpression>> {
        let mut out = Vec::new();
        self.collect_expressions(&mut out);
        out
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a Arc<CompiledExpression>>) {
        match self {
            Template::Literal(_) => {}
            Template::Expression(expr) => out.push(expr),
            Template::Interpolated(fragments) => {
                for fragment in fragments {
                    if let Fragment::Expression(expr) = fragment {
                        out.push(expr);
                    }
                }
            }
            Template::List(items) => items.iter().for_each(|t| t.collect_expressions(out)),
            Template::Map(entries) => entries.values().for_each(|t| t.collect_expressions(out)),
        }
    }

    pub fn render(&self, scope: &dyn VariableLookup, env: &mut EvalEnv) -> Result<Value> {
        match self {
            Template::Literal(value) => Ok(value.clone()),
            Template::Expression(expr) => expr.evaluate_with(scope, env),
            Template::Interpolated(fragments) => {
                let mut out = String::new();
                for fragment in fragments {
                    match fragment {
                        Fragment::Text(text) => out.push_str(text),
                        Fragment::Expression(expr) => {
                            let value = expr.evaluate_with(scope, env)?;
                            if !value.is_null() {
                                out.push_str(&value.to_string());
                            }
                        }
                    }
                }
                Ok(Value::String(out))
            }
            Template::List(items) => items
                .iter()
                .map(|item| item.render(scope, env))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Template::Map(entries) => entries
                .iter()
                .map(|(k, t)| Ok((k.clone(), t.render(scope, env)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Value::Map),
        }
    }
}

/// Index of the `}` closing a `${` whose body starts at `start`, skipping quoted strings.
pub(crate) fn find_close(source: &str, start: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == b'\\' {
                    i += 1;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'\'' | b'"' => quote = Some(c),
                b'{' => depth += 1,
                b'}' if depth == 0 => return Some(i),
                b'}' => depth -= 1,
                _ => {}
            },
        }
        i += 1;
    }
    None
}
