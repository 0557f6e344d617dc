//! Built-in function table.
//!
//! The table is closed: the parser resolves names here, so an unknown function is a compile
//! error rather than an evaluation failure.

use std::collections::BTreeMap;

use ai_core::{DeterministicRng, Value};
use chrono::{DateTime, Utc};

use crate::error::{ExprError, Result};
use crate::eval::EvalEnv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    // arithmetic
    Abs,
    Min,
    Max,
    Floor,
    Ceil,
    Round,
    Sqrt,
    Pow,
    Clamp,
    // string
    Len,
    Lower,
    Upper,
    Trim,
    Contains,
    StartsWith,
    EndsWith,
    Substring,
    Split,
    Join,
    Concat,
    ToString,
    ToNumber,
    // collection
    First,
    Last,
    Keys,
    Values,
    IsEmpty,
    Sum,
    Avg,
    // random
    Random,
    RandomInt,
    RandomChoice,
    Chance,
    // time
    Now,
    FormatTime,
}

pub struct FunctionSpec {
    pub name: &'static str,
    pub builtin: Builtin,
    pub min_args: usize,
    /// `None` means variadic.
    pub max_args: Option<usize>,
}

const fn spec(
    name: &'static str,
    builtin: Builtin,
    min_args: usize,
    max_args: Option<usize>,
) -> FunctionSpec {
    FunctionSpec {
        name,
        builtin,
        min_args,
        max_args,
    }
}

pub const FUNCTIONS: &[FunctionSpec] = &[
    spec("abs", Builtin::Abs, 1, Some(1)),
    spec("min", Builtin::Min, 1, None),
    spec("max", Builtin::Max, 1, None),
    spec("floor", Builtin::Floor, 1, Some(1)),
    spec("ceil", Builtin::Ceil, 1, Some(1)),
    spec("round", Builtin::Round, 1, Some(2)),
    spec("sqrt", Builtin::Sqrt, 1, Some(1)),
    spec("pow", Builtin::Pow, 2, Some(2)),
    spec("clamp", Builtin::Clamp, 3, Some(3)),
    spec("len", Builtin::Len, 1, Some(1)),
    spec("lower", Builtin::Lower, 1, Some(1)),
    spec("upper", Builtin::Upper, 1, Some(1)),
    spec("trim", Builtin::Trim, 1, Some(1)),
    spec("contains", Builtin::Contains, 2, Some(2)),
    spec("starts_with", Builtin::StartsWith, 2, Some(2)),
    spec("ends_with", Builtin::EndsWith, 2, Some(2)),
    spec("substring", Builtin::Substring, 2, Some(3)),
    spec("split", Builtin::Split, 2, Some(2)),
    spec("join", Builtin::Join, 2, Some(2)),
    spec("concat", Builtin::Concat, 0, None),
    spec("to_string", Builtin::ToString, 1, Some(1)),
    spec("to_number", Builtin::ToNumber, 1, Some(1)),
    spec("first", Builtin::First, 1, Some(1)),
    spec("last", Builtin::Last, 1, Some(1)),
    spec("keys", Builtin::Keys, 1, Some(1)),
    spec("values", Builtin::Values, 1, Some(1)),
    spec("is_empty", Builtin::IsEmpty, 1, Some(1)),
    spec("sum", Builtin::Sum, 1, Some(1)),
    spec("avg", Builtin::Avg, 1, Some(1)),
    spec("random", Builtin::Random, 0, Some(0)),
    spec("random_int", Builtin::RandomInt, 2, Some(2)),
    spec("random_choice", Builtin::RandomChoice, 1, Some(1)),
    spec("chance", Builtin::Chance, 1, Some(1)),
    spec("now", Builtin::Now, 0, Some(0)),
    spec("format_time", Builtin::FormatTime, 2, Some(2)),
];

pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

impl FunctionSpec {
    pub(crate) fn check_arity(&self, found: usize) -> Result<()> {
        let ok = found >= self.min_args && self.max_args.is_none_or(|max| found <= max);
        if ok {
            return Ok(());
        }
        let expected = match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{}..={}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        };
        Err(ExprError::Arity {
            name: self.name.to_string(),
            expected,
            found,
        })
    }
}

impl Builtin {
    pub fn name(self) -> &'static str {
        FUNCTIONS
            .iter()
            .find(|f| f.builtin == self)
            .map(|f| f.name)
            .unwrap_or("<builtin>")
    }
}

fn number(function: Builtin, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        ExprError::mismatch(format!(
            "{}() expects a number, got {}",
            function.name(),
            value.type_name()
        ))
    })
}

fn string(function: Builtin, value: &Value) -> Result<&str> {
    value.as_str().ok_or_else(|| {
        ExprError::mismatch(format!(
            "{}() expects a string, got {}",
            function.name(),
            value.type_name()
        ))
    })
}

fn list(function: Builtin, value: &Value) -> Result<&[Value]> {
    value.as_list().ok_or_else(|| {
        ExprError::mismatch(format!(
            "{}() expects a list, got {}",
            function.name(),
            value.type_name()
        ))
    })
}

fn map(function: Builtin, value: &Value) -> Result<&BTreeMap<String, Value>> {
    value.as_map().ok_or_else(|| {
        ExprError::mismatch(format!(
            "{}() expects a map, got {}",
            function.name(),
            value.type_name()
        ))
    })
}

/// `min(1, 2)` and `min([1, 2])` are both accepted.
fn numeric_operands(function: Builtin, args: &[Value]) -> Result<Vec<f64>> {
    let items: &[Value] = match args {
        [Value::List(items)] => items,
        other => other,
    };
    if items.is_empty() {
        return Err(ExprError::mismatch(format!(
            "{}() needs at least one number",
            function.name()
        )));
    }
    items.iter().map(|v| number(function, v)).collect()
}

pub(crate) fn call(function: Builtin, args: Vec<Value>, env: &mut EvalEnv) -> Result<Value> {
    use Builtin::*;

    let value = match function {
        Abs => Value::Number(number(function, &args[0])?.abs()),
        Min => Value::Number(
            numeric_operands(function, &args)?
                .into_iter()
                .fold(f64::INFINITY, f64::min),
        ),
        Max => Value::Number(
            numeric_operands(function, &args)?
                .into_iter()
                .fold(f64::NEG_INFINITY, f64::max),
        ),
        Floor => Value::Number(number(function, &args[0])?.floor()),
        Ceil => Value::Number(number(function, &args[0])?.ceil()),
        Round => {
            let x = number(function, &args[0])?;
            let digits = match args.get(1) {
                Some(d) => number(function, d)?,
                None => 0.0,
            };
            let factor = 10f64.powi(digits as i32);
            Value::Number((x * factor).round() / factor)
        }
        Sqrt => {
            let x = number(function, &args[0])?;
            if x < 0.0 {
                return Err(ExprError::Arithmetic {
                    message: format!("sqrt of negative number {x}"),
                });
            }
            Value::Number(x.sqrt())
        }
        Pow => Value::Number(number(function, &args[0])?.powf(number(function, &args[1])?)),
        Clamp => {
            let x = number(function, &args[0])?;
            let lo = number(function, &args[1])?;
            let hi = number(function, &args[2])?;
            if lo > hi {
                return Err(ExprError::Arithmetic {
                    message: format!("clamp bounds inverted: {lo} > {hi}"),
                });
            }
            Value::Number(x.clamp(lo, hi))
        }
        Len => Value::from(match &args[0] {
            Value::String(s) => s.chars().count(),
            Value::List(items) => items.len(),
            Value::Map(m) => m.len(),
            other => {
                return Err(ExprError::mismatch(format!(
                    "len() expects a string, list or map, got {}",
                    other.type_name()
                )))
            }
        }),
        Lower => Value::from(string(function, &args[0])?.to_lowercase()),
        Upper => Value::from(string(function, &args[0])?.to_uppercase()),
        Trim => Value::from(string(function, &args[0])?.trim()),
        Contains => Value::Bool(contains(&args[0], &args[1])?),
        StartsWith => {
            Value::Bool(string(function, &args[0])?.starts_with(string(function, &args[1])?))
        }
        EndsWith => {
            Value::Bool(string(function, &args[0])?.ends_with(string(function, &args[1])?))
        }
        Substring => {
            let s = string(function, &args[0])?;
            let start = number(function, &args[1])?.max(0.0) as usize;
            let chars = s.chars().skip(start);
            let out: String = match args.get(2) {
                Some(len) => chars.take(number(function, len)?.max(0.0) as usize).collect(),
                None => chars.collect(),
            };
            Value::from(out)
        }
        Split => {
            let s = string(function, &args[0])?;
            let sep = string(function, &args[1])?;
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::from(c.to_string())).collect()
            } else {
                s.split(sep).map(Value::from).collect()
            };
            Value::List(parts)
        }
        Join => {
            let items = list(function, &args[0])?;
            let sep = string(function, &args[1])?;
            let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
            Value::from(parts.join(sep))
        }
        Concat => Value::from(args.iter().map(|v| v.to_string()).collect::<String>()),
        ToString => Value::from(args[0].to_string()),
        ToNumber => match &args[0] {
            Value::Number(n) => Value::Number(*n),
            Value::Bool(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().map(Value::Number).map_err(|_| {
                ExprError::mismatch(format!("to_number() cannot parse {s:?}"))
            })?,
            other => {
                return Err(ExprError::mismatch(format!(
                    "to_number() cannot convert {}",
                    other.type_name()
                )))
            }
        },
        First => list(function, &args[0])?.first().cloned().unwrap_or(Value::Null),
        Last => list(function, &args[0])?.last().cloned().unwrap_or(Value::Null),
        Keys => Value::List(map(function, &args[0])?.keys().map(|k| Value::from(k.as_str())).collect()),
        Values => Value::List(map(function, &args[0])?.values().cloned().collect()),
        IsEmpty => Value::Bool(match &args[0] {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(m) => m.is_empty(),
            other => {
                return Err(ExprError::mismatch(format!(
                    "is_empty() expects a collection, got {}",
                    other.type_name()
                )))
            }
        }),
        Sum => {
            let items = list(function, &args[0])?;
            let mut total = 0.0;
            for item in items {
                total += number(function, item)?;
            }
            Value::Number(total)
        }
        Avg => {
            let items = list(function, &args[0])?;
            if items.is_empty() {
                Value::Null
            } else {
                let mut total = 0.0;
                for item in items {
                    total += number(function, item)?;
                }
                Value::Number(total / items.len() as f64)
            }
        }
        Random => Value::Number(env.rng.next_f64_unit()),
        RandomInt => {
            let lo = number(function, &args[0])?.floor() as i64;
            let hi = number(function, &args[1])?.floor() as i64;
            Value::from(env.rng.next_range_inclusive(lo, hi))
        }
        RandomChoice => {
            let items = list(function, &args[0])?;
            if items.is_empty() {
                Value::Null
            } else {
                let index = env.rng.next_range_inclusive(0, items.len() as i64 - 1) as usize;
                items[index].clone()
            }
        }
        Chance => {
            let p = number(function, &args[0])?;
            Value::Bool(env.rng.next_f64_unit() < p)
        }
        Now => Value::Number(env.now_seconds()),
        FormatTime => {
            let secs = number(function, &args[0])?;
            let fmt = string(function, &args[1])?;
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9) as u32;
            let time: DateTime<Utc> = DateTime::from_timestamp(whole as i64, nanos)
                .ok_or_else(|| ExprError::Arithmetic {
                    message: format!("timestamp out of range: {secs}"),
                })?;
            Value::from(time.format(fmt).to_string())
        }
    };
    Ok(value)
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool> {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            other => Ok(s.contains(&other.to_string())),
        },
        Value::List(items) => Ok(items.iter().any(|item| crate::eval::values_equal(item, needle))),
        Value::Map(m) => match needle {
            Value::String(key) => Ok(m.contains_key(key)),
            _ => Ok(false),
        },
        Value::Null => Ok(false),
        other => Err(ExprError::mismatch(format!(
            "cannot test membership in {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn membership(needle: &Value, haystack: &Value) -> Result<bool> {
    contains(haystack, needle)
}
