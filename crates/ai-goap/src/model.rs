use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GoapError, Result};
use crate::predicate::{Condition, Effect};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoapGoal {
    pub name: String,
    /// Higher is more urgent.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: BTreeMap<String, Condition>,
}

impl GoapGoal {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            conditions: BTreeMap::new(),
        }
    }

    /// Add a condition in string form (`"<= 0.3"`, `"idle"`).
    pub fn require(mut self, key: impl Into<String>, condition: &str) -> Result<Self> {
        self.conditions.insert(key.into(), Condition::parse(condition)?);
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoapAction {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub preconditions: BTreeMap<String, Condition>,
    #[serde(default)]
    pub effects: BTreeMap<String, Effect>,
    #[serde(default = "default_cost")]
    pub cost: f64,
}

fn default_cost() -> f64 {
    1.0
}

impl GoapAction {
    pub fn new(id: impl Into<String>, cost: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            preconditions: BTreeMap::new(),
            effects: BTreeMap::new(),
            cost,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn precondition(mut self, key: impl Into<String>, condition: &str) -> Result<Self> {
        self.preconditions
            .insert(key.into(), Condition::parse(condition)?);
        Ok(self)
    }

    pub fn effect(mut self, key: impl Into<String>, effect: &str) -> Result<Self> {
        self.effects.insert(key.into(), Effect::parse(effect)?);
        Ok(self)
    }

    /// Display name, falling back to the id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cost.is_nan() || self.cost < 0.0 {
            return Err(GoapError::NegativeCost {
                action: self.id.clone(),
                cost: self.cost,
            });
        }
        Ok(())
    }
}

/// An action whose effects can make the distance heuristic overestimate remaining cost.
#[derive(Debug, Clone, PartialEq)]
pub enum HeuristicWarning {
    /// A delta on a goal key moves further than the action costs.
    Overshoot {
        action: String,
        key: String,
        delta: f64,
        cost: f64,
    },
    /// An absolute assignment to a numeric goal key can close any distance in one step.
    AbsoluteAssignment { action: String, key: String },
}

impl fmt::Display for HeuristicWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeuristicWarning::Overshoot {
                action,
                key,
                delta,
                cost,
            } => write!(
                f,
                "action `{action}` changes `{key}` by {delta} at cost {cost}; plans may be non-optimal"
            ),
            HeuristicWarning::AbsoluteAssignment { action, key } => write!(
                f,
                "action `{action}` assigns goal key `{key}` absolutely; plans may be non-optimal"
            ),
        }
    }
}

/// Check each action against the numeric goal keys of `goals`.
pub fn admissibility_warnings(actions: &[GoapAction], goals: &[GoapGoal]) -> Vec<HeuristicWarning> {
    let mut warnings = Vec::new();
    for action in actions {
        for (key, effect) in &action.effects {
            let numeric_goal_key = goals.iter().any(|goal| {
                goal.conditions
                    .get(key)
                    .is_some_and(|c| c.target.as_f64().is_some())
            });
            if !numeric_goal_key {
                continue;
            }
            match effect {
                Effect::Delta(delta) if delta.abs() > action.cost => {
                    warnings.push(HeuristicWarning::Overshoot {
                        action: action.id.clone(),
                        key: key.clone(),
                        delta: *delta,
                        cost: action.cost,
                    });
                }
                Effect::Set(value) if value.as_f64().is_some() => {
                    warnings.push(HeuristicWarning::AbsoluteAssignment {
                        action: action.id.clone(),
                        key: key.clone(),
                    });
                }
                _ => {}
            }
        }
    }
    warnings
}

/// An ordered, costed sequence of actions toward `goal_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoapPlan {
    pub goal_id: String,
    pub actions: Vec<GoapAction>,
    pub total_cost: f64,
}

impl GoapPlan {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn action_ids(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.id.as_str()).collect()
    }
}
