//! Condition and effect grammar.
//!
//! Conditions: `"<op> <value>"` with `op` one of `== != < <= > >=`, or a bare value meaning `==`.
//! Effects: a leading `+`/`-` makes a numeric delta, `"=<value>"` or any unsigned value assigns.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GoapError, Result};
use crate::world::{WorldKind, WorldValue, EPSILON};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn is_ordering(self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    /// How far `current` is from satisfying `op target`; zero when satisfied.
    pub fn missing_distance(self, current: f64, target: f64) -> f64 {
        match self {
            CompareOp::Eq => (current - target).abs(),
            CompareOp::Ne => 0.0,
            CompareOp::Lt | CompareOp::Le => (current - target).max(0.0),
            CompareOp::Gt | CompareOp::Ge => (target - current).max(0.0),
        }
    }
}

/// `key <op> target`, with the key held by the enclosing map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorldValue", into = "WorldValue")]
pub struct Condition {
    pub op: CompareOp,
    pub target: WorldValue,
}

impl Condition {
    pub fn new(op: CompareOp, target: impl Into<WorldValue>) -> Result<Self> {
        let target = target.into();
        if op.is_ordering() && target.kind() != WorldKind::Number {
            return Err(GoapError::InvalidCondition {
                input: format!("{} {}", op.symbol(), target),
                reason: "ordering comparisons need a numeric target".to_string(),
            });
        }
        Ok(Self { op, target })
    }

    pub fn equals(target: impl Into<WorldValue>) -> Self {
        Self {
            op: CompareOp::Eq,
            target: target.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        const OPS: [(&str, CompareOp); 6] = [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
        ];
        for (symbol, op) in OPS {
            if let Some(rest) = s.strip_prefix(symbol) {
                let rest = rest.trim();
                if rest.is_empty() {
                    return Err(GoapError::InvalidCondition {
                        input: input.to_string(),
                        reason: "missing target value".to_string(),
                    });
                }
                return Self::new(op, WorldValue::parse_scalar(rest)).map_err(|err| match err {
                    GoapError::InvalidCondition { reason, .. } => GoapError::InvalidCondition {
                        input: input.to_string(),
                        reason,
                    },
                    other => other,
                });
            }
        }
        Ok(Self::equals(WorldValue::parse_scalar(s)))
    }

    /// Evaluate against a value of the same kind as the target.
    pub fn holds(&self, current: &WorldValue) -> bool {
        match (current, &self.target) {
            (WorldValue::Number(a), WorldValue::Number(b)) => match self.op {
                CompareOp::Eq => (a - b).abs() <= EPSILON,
                CompareOp::Ne => (a - b).abs() > EPSILON,
                CompareOp::Lt => a < b,
                CompareOp::Le => *a <= b + EPSILON,
                CompareOp::Gt => a > b,
                CompareOp::Ge => *a >= b - EPSILON,
            },
            (a, b) => match self.op {
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
                _ => false,
            },
        }
    }
}

impl TryFrom<WorldValue> for Condition {
    type Error = GoapError;

    fn try_from(value: WorldValue) -> Result<Self> {
        match value {
            WorldValue::Text(s) => Condition::parse(&s),
            other => Ok(Condition::equals(other)),
        }
    }
}

impl From<Condition> for WorldValue {
    fn from(condition: Condition) -> Self {
        match (condition.op, condition.target) {
            (CompareOp::Eq, WorldValue::Text(s)) => WorldValue::Text(format!("== {s}")),
            (CompareOp::Eq, target) => target,
            (op, target) => WorldValue::Text(format!("{} {}", op.symbol(), target)),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.symbol(), self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorldValue", into = "WorldValue")]
pub enum Effect {
    /// Add to the current numeric value (absent counts as zero).
    Delta(f64),
    /// Replace the value.
    Set(WorldValue),
}

impl Effect {
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if let Some(rest) = s.strip_prefix('=') {
            return Ok(Effect::Set(WorldValue::parse_scalar(rest)));
        }
        if s.starts_with('+') || s.starts_with('-') {
            let delta = s.parse::<f64>().map_err(|_| GoapError::InvalidEffect {
                input: input.to_string(),
                reason: "signed effects must be numeric deltas".to_string(),
            })?;
            return Ok(Effect::Delta(delta));
        }
        Ok(Effect::Set(WorldValue::parse_scalar(s)))
    }

    pub fn delta(&self) -> Option<f64> {
        match self {
            Effect::Delta(d) => Some(*d),
            Effect::Set(_) => None,
        }
    }
}

impl TryFrom<WorldValue> for Effect {
    type Error = GoapError;

    fn try_from(value: WorldValue) -> Result<Self> {
        match value {
            WorldValue::Text(s) => Effect::parse(&s),
            other => Ok(Effect::Set(other)),
        }
    }
}

impl From<Effect> for WorldValue {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Delta(d) if d < 0.0 => WorldValue::Text(format!("{d}")),
            Effect::Delta(d) => WorldValue::Text(format!("+{d}")),
            Effect::Set(WorldValue::Text(s)) => WorldValue::Text(format!("={s}")),
            Effect::Set(value) => value,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", WorldValue::from(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_forms() {
        assert_eq!(
            Condition::parse("<= 0.3").unwrap(),
            Condition {
                op: CompareOp::Le,
                target: WorldValue::Number(0.3)
            }
        );
        assert_eq!(Condition::parse(">0.5").unwrap().op, CompareOp::Gt);
        assert_eq!(Condition::parse("idle").unwrap(), Condition::equals("idle"));
        assert_eq!(Condition::parse("true").unwrap(), Condition::equals(true));
        assert_eq!(Condition::parse("!= 'a b'").unwrap().target, WorldValue::from("a b"));
    }

    #[test]
    fn ordering_against_text_is_rejected() {
        assert!(matches!(
            Condition::parse("< high"),
            Err(GoapError::InvalidCondition { .. })
        ));
        assert!(Condition::parse(">=").is_err());
    }

    #[test]
    fn effect_forms() {
        assert_eq!(Effect::parse("-0.8").unwrap(), Effect::Delta(-0.8));
        assert_eq!(Effect::parse("+2").unwrap(), Effect::Delta(2.0));
        assert_eq!(Effect::parse("=5").unwrap(), Effect::Set(WorldValue::Number(5.0)));
        assert_eq!(Effect::parse("5").unwrap(), Effect::Set(WorldValue::Number(5.0)));
        assert_eq!(Effect::parse("home").unwrap(), Effect::Set("home".into()));
        assert!(Effect::parse("-far").is_err());
    }

    #[test]
    fn numeric_equality_uses_tolerance() {
        let c = Condition::equals(0.3);
        assert!(c.holds(&WorldValue::Number(0.1 + 0.2)));
        assert!(!c.holds(&WorldValue::Number(0.31)));
    }

    #[test]
    fn display_round_trips_through_world_value() {
        for input in ["<= 0.3", "== idle", "!= true"] {
            let parsed = Condition::parse(input).unwrap();
            let back = Condition::try_from(WorldValue::from(parsed.clone())).unwrap();
            assert_eq!(back, parsed);
        }
    }
}
