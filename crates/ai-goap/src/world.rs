use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ai_core::Value;
use serde::{Deserialize, Serialize};

use crate::error::{GoapError, Result};
use crate::predicate::{Condition, Effect};

/// Tolerance for numeric equality in conditions.
pub const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldKind {
    Number,
    Bool,
    Text,
}

impl fmt::Display for WorldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorldKind::Number => "number",
            WorldKind::Bool => "bool",
            WorldKind::Text => "text",
        })
    }
}

/// A single planning fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl WorldValue {
    pub fn kind(&self) -> WorldKind {
        match self {
            WorldValue::Number(_) => WorldKind::Number,
            WorldValue::Bool(_) => WorldKind::Bool,
            WorldValue::Text(_) => WorldKind::Text,
        }
    }

    /// Value assumed for a key the state does not carry.
    pub fn default_for(kind: WorldKind) -> Self {
        match kind {
            WorldKind::Number => WorldValue::Number(0.0),
            WorldKind::Bool => WorldValue::Bool(false),
            WorldKind::Text => WorldValue::Text(String::new()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WorldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Scalar conversion from a scope value; collections and null have no world form.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(WorldValue::Bool(*b)),
            Value::Number(n) => Some(WorldValue::Number(*n)),
            Value::String(s) => Some(WorldValue::Text(s.clone())),
            Value::Null | Value::List(_) | Value::Map(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            WorldValue::Bool(b) => Value::Bool(*b),
            WorldValue::Number(n) => Value::Number(*n),
            WorldValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Parse an unannotated scalar: `true`/`false`, a number, or text (quotes stripped).
    pub fn parse_scalar(input: &str) -> Self {
        let s = input.trim();
        match s {
            "true" => return WorldValue::Bool(true),
            "false" => return WorldValue::Bool(false),
            _ => {}
        }
        if let Ok(n) = s.parse::<f64>() {
            return WorldValue::Number(n);
        }
        let unquoted = s
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .or_else(|| s.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
            .unwrap_or(s);
        WorldValue::Text(unquoted.to_string())
    }
}

impl fmt::Display for WorldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldValue::Bool(b) => write!(f, "{b}"),
            WorldValue::Number(n) => write!(f, "{n}"),
            WorldValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for WorldValue {
    fn from(value: f64) -> Self {
        WorldValue::Number(value)
    }
}

impl From<i32> for WorldValue {
    fn from(value: i32) -> Self {
        WorldValue::Number(value as f64)
    }
}

impl From<bool> for WorldValue {
    fn from(value: bool) -> Self {
        WorldValue::Bool(value)
    }
}

impl From<&str> for WorldValue {
    fn from(value: &str) -> Self {
        WorldValue::Text(value.to_string())
    }
}

impl From<String> for WorldValue {
    fn from(value: String) -> Self {
        WorldValue::Text(value)
    }
}

/// Immutable snapshot of planning facts.
///
/// Cloning is cheap (shared map); [`WorldState::apply_effects`] copies on write, so search nodes
/// share unmodified ancestors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldState {
    facts: Arc<BTreeMap<String, WorldValue>>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_facts(facts: BTreeMap<String, WorldValue>) -> Self {
        Self {
            facts: Arc::new(facts),
        }
    }

    /// Flatten a scope value into dot-path facts (`{inventory: {iron: 3}}` -> `inventory.iron`).
    /// Null and list entries are skipped.
    pub fn from_value(value: &Value) -> Self {
        let mut facts = BTreeMap::new();
        if let Value::Map(map) = value {
            for (key, entry) in map {
                flatten_into(&mut facts, key.clone(), entry);
            }
        }
        Self::from_facts(facts)
    }

    /// Builder-style insert (copies on write).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<WorldValue>) -> Self {
        Arc::make_mut(&mut self.facts).insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&WorldValue> {
        self.facts.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(WorldValue::as_f64)
    }

    pub fn facts(&self) -> &BTreeMap<String, WorldValue> {
        &self.facts
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Current value for `key`, or the kind default when absent.
    fn resolve(&self, key: &str, kind: WorldKind) -> Result<WorldValue> {
        match self.facts.get(key) {
            None => Ok(WorldValue::default_for(kind)),
            Some(value) if value.kind() == kind => Ok(value.clone()),
            Some(value) => Err(GoapError::TypeMismatch {
                key: key.to_string(),
                expected: kind,
                found: value.kind(),
            }),
        }
    }

    /// True when every condition holds. Absent keys read as zero/false/empty.
    pub fn satisfies(&self, conditions: &BTreeMap<String, Condition>) -> Result<bool> {
        for (key, condition) in conditions {
            let current = self.resolve(key, condition.target.kind())?;
            if !condition.holds(&current) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn satisfies_goal(&self, goal: &crate::GoapGoal) -> Result<bool> {
        self.satisfies(&goal.conditions)
    }

    /// Returns a new state; `self` is left untouched.
    pub fn apply_effects(&self, effects: &BTreeMap<String, Effect>) -> Result<WorldState> {
        if effects.is_empty() {
            return Ok(self.clone());
        }
        let mut facts = (*self.facts).clone();
        for (key, effect) in effects {
            let next = match effect {
                Effect::Delta(delta) => {
                    let current = self.resolve(key, WorldKind::Number)?;
                    WorldValue::Number(current.as_f64().unwrap_or(0.0) + delta)
                }
                Effect::Set(value) => {
                    if let Some(existing) = self.facts.get(key) {
                        if existing.kind() != value.kind() {
                            return Err(GoapError::TypeMismatch {
                                key: key.clone(),
                                expected: existing.kind(),
                                found: value.kind(),
                            });
                        }
                    }
                    value.clone()
                }
            };
            facts.insert(key.clone(), next);
        }
        Ok(Self::from_facts(facts))
    }

    /// Sum of missing distances over the numeric conditions (admissible A* heuristic when every
    /// action's cost is at least the progress it makes).
    pub fn distance_to_goal(&self, conditions: &BTreeMap<String, Condition>) -> f64 {
        conditions
            .iter()
            .filter_map(|(key, condition)| {
                let target = condition.target.as_f64()?;
                let current = match self.facts.get(key) {
                    None => 0.0,
                    Some(value) => value.as_f64()?,
                };
                Some(condition.op.missing_distance(current, target))
            })
            .sum()
    }

    /// Hashable, totally ordered fingerprint for visited-state deduplication.
    pub fn key(&self) -> StateKey {
        StateKey(
            self.facts
                .iter()
                .map(|(k, v)| {
                    let atom = match v {
                        // Normalise -0.0 so it dedups with 0.0.
                        WorldValue::Number(n) => StateAtom::Number((n + 0.0).to_bits()),
                        WorldValue::Bool(b) => StateAtom::Bool(*b),
                        WorldValue::Text(s) => StateAtom::Text(s.clone()),
                    };
                    (k.clone(), atom)
                })
                .collect(),
        )
    }

    pub fn to_value(&self) -> Value {
        Value::Map(
            self.facts
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }
}

fn flatten_into(facts: &mut BTreeMap<String, WorldValue>, prefix: String, value: &Value) {
    match value {
        Value::Map(map) => {
            for (key, entry) in map {
                flatten_into(facts, format!("{prefix}.{key}"), entry);
            }
        }
        other => {
            if let Some(v) = WorldValue::from_value(other) {
                facts.insert(prefix, v);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum StateAtom {
    Number(u64),
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey(Vec<(String, StateAtom)>);
