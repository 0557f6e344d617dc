use std::cmp::Ordering;

use ai_core::{ScopeLayer, SplitMix64, Value, VariableLookup};

use crate::ast::{BinaryOp, Expr, LogicalOp, PathBase, Segment, SegmentKind, UnaryOp};
use crate::error::{ExprError, Result};
use crate::functions;

/// Per-evaluation side inputs: the random stream and the clock reading.
///
/// The executor keeps one `EvalEnv` per channel so `random()` draws are reproducible for a
/// given seed.
#[derive(Debug, Clone)]
pub struct EvalEnv {
    pub rng: SplitMix64,
    /// Fixed `now()` in seconds since the Unix epoch; `None` reads the wall clock.
    pub now: Option<f64>,
}

impl EvalEnv {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SplitMix64::new(seed),
            now: None,
        }
    }

    pub fn with_now(mut self, seconds: f64) -> Self {
        self.now = Some(seconds);
        self
    }

    pub fn now_seconds(&self) -> f64 {
        match self.now {
            Some(now) => now,
            None => chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}

impl Default for EvalEnv {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Structural equality; numbers compare by value and mismatched kinds are unequal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Map(xs), Value::Map(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|((kx, vx), (ky, vy))| kx == ky && values_equal(vx, vy))
        }
        _ => a == b,
    }
}

pub(crate) fn evaluate(expr: &Expr, scope: &dyn VariableLookup, env: &mut EvalEnv) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, scope, env))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Expr::Path { base, segments } => evaluate_path(base, segments, scope, env),
        Expr::Call { function, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, scope, env))
                .collect::<Result<Vec<_>>>()?;
            functions::call(*function, args, env)
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, scope, env)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Neg => match value {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    other => Err(ExprError::mismatch(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::Binary { op, left, right } => {
            let left = evaluate(left, scope, env)?;
            let right = evaluate(right, scope, env)?;
            binary(*op, &left, &right)
        }
        Expr::Logical { op, left, right } => {
            let left = evaluate(left, scope, env)?.is_truthy();
            let short = match op {
                LogicalOp::And => !left,
                LogicalOp::Or => left,
            };
            if short {
                return Ok(Value::Bool(left));
            }
            Ok(Value::Bool(evaluate(right, scope, env)?.is_truthy()))
        }
        Expr::Coalesce { left, right } => match evaluate(left, scope, env) {
            Ok(Value::Null) | Err(ExprError::UndefinedVariable { .. }) => {
                evaluate(right, scope, env)
            }
            other => other,
        },
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => {
            if evaluate(condition, scope, env)?.is_truthy() {
                evaluate(then, scope, env)
            } else {
                evaluate(otherwise, scope, env)
            }
        }
    }
}

fn evaluate_path(
    base: &PathBase,
    segments: &[Segment],
    scope: &dyn VariableLookup,
    env: &mut EvalEnv,
) -> Result<Value> {
    let mut rest = segments;
    let mut current = match base {
        PathBase::Variable(name) => match (ScopeLayer::from_root(name), segments.first()) {
            (
                Some(layer),
                Some(Segment {
                    kind: SegmentKind::Field(key),
                    ..
                }),
            ) => {
                rest = &segments[1..];
                scope.lookup_in(layer, key)
            }
            _ => scope.lookup(name),
        },
        PathBase::Expr(expr) => Some(evaluate(expr, scope, env)?),
    };

    for (i, segment) in rest.iter().enumerate() {
        let value = match current {
            Some(Value::Null) | None if segment.null_safe => return Ok(Value::Null),
            None => return Err(undefined(base, segments, segments.len() - rest.len() + i)),
            Some(value) => value,
        };
        let key = match &segment.kind {
            SegmentKind::Field(name) => name.clone(),
            SegmentKind::Index(index) => match evaluate(index, scope, env)? {
                Value::String(s) => s,
                Value::Number(n) if n.fract() == 0.0 => {
                    if n < 0.0 {
                        // Negative indices count from the end of a list.
                        match &value {
                            Value::List(items) => {
                                let len = items.len() as i64;
                                (len + n as i64).max(-1).to_string()
                            }
                            _ => (n as i64).to_string(),
                        }
                    } else {
                        (n as u64).to_string()
                    }
                }
                other => {
                    return Err(ExprError::mismatch(format!(
                        "cannot index with {}",
                        other.type_name()
                    )))
                }
            },
        };
        current = match &value {
            Value::Map(_) | Value::List(_) => value.member(&key).cloned(),
            Value::Null => None,
            other => {
                return Err(ExprError::mismatch(format!(
                    "cannot read member `{key}` of {}",
                    other.type_name()
                )))
            }
        };
    }

    current.ok_or_else(|| undefined(base, segments, segments.len()))
}

/// Render the base plus the first `count` segments for error messages.
fn undefined(base: &PathBase, segments: &[Segment], count: usize) -> ExprError {
    let mut path = match base {
        PathBase::Variable(name) => name.clone(),
        PathBase::Expr(_) => "(expr)".to_string(),
    };
    for segment in segments.iter().take(count) {
        if segment.null_safe {
            path.push('?');
        }
        match &segment.kind {
            SegmentKind::Field(name) => {
                path.push('.');
                path.push_str(name);
            }
            SegmentKind::Index(_) => path.push_str("[..]"),
        }
    }
    ExprError::UndefinedVariable { path }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    use BinaryOp::*;

    match op {
        Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{left}{right}")))
            }
            (Value::List(a), Value::List(b)) => {
                Ok(Value::List(a.iter().chain(b).cloned().collect()))
            }
            _ => Err(operand_mismatch("+", left, right)),
        },
        Sub | Mul | Div | Rem => {
            let (Value::Number(a), Value::Number(b)) = (left, right) else {
                return Err(operand_mismatch(symbol(op), left, right));
            };
            let (a, b) = (*a, *b);
            match op {
                Sub => Ok(Value::Number(a - b)),
                Mul => Ok(Value::Number(a * b)),
                Div | Rem if b == 0.0 => Err(ExprError::Arithmetic {
                    message: format!("{} by zero", if op == Div { "division" } else { "modulo" }),
                }),
                Div => Ok(Value::Number(a / b)),
                _ => Ok(Value::Number(a % b)),
            }
        }
        Eq => Ok(Value::Bool(values_equal(left, right))),
        Ne => Ok(Value::Bool(!values_equal(left, right))),
        Lt | Le | Gt | Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => return Err(operand_mismatch(symbol(op), left, right)),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                Lt => ordering == Ordering::Less,
                Le => ordering != Ordering::Greater,
                Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        In => functions::membership(left, right).map(Value::Bool),
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::In => "in",
    }
}

fn operand_mismatch(op: &str, left: &Value, right: &Value) -> ExprError {
    ExprError::mismatch(format!(
        "operator `{op}` not supported between {} and {}",
        left.type_name(),
        right.type_name()
    ))
}
