use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{GoapAction, GoapGoal, GoapPlan};
use crate::planner::{plan, PlannerOptions};
use crate::world::WorldState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanReason {
    PlanCompleted,
    PreconditionInvalidated,
    BetterGoalAvailable,
    /// Reported by the caller when a step's handler fails.
    ActionFailed,
    /// Reported by the caller when an outside event changed the world.
    ExternalInterrupt,
}

impl ReplanReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplanReason::PlanCompleted => "plan_completed",
            ReplanReason::PreconditionInvalidated => "precondition_invalidated",
            ReplanReason::BetterGoalAvailable => "better_goal_available",
            ReplanReason::ActionFailed => "action_failed",
            ReplanReason::ExternalInterrupt => "external_interrupt",
        }
    }
}

impl fmt::Display for ReplanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanValidation {
    pub is_valid: bool,
    pub reason: Option<ReplanReason>,
    /// Set with `BetterGoalAvailable`.
    pub better_goal: Option<String>,
}

impl PlanValidation {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
            better_goal: None,
        }
    }

    pub fn invalid(reason: ReplanReason) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
            better_goal: None,
        }
    }
}

/// Checks an in-flight plan against the current world before each step.
///
/// "Newly" achievable goals are judged against a baseline captured by [`PlanMonitor::begin`]:
/// a higher-priority goal that was already plannable when the plan started does not interrupt it
/// again.
#[derive(Debug, Clone)]
pub struct PlanMonitor {
    goals: Vec<GoapGoal>,
    actions: Vec<GoapAction>,
    probe: PlannerOptions,
    baseline: BTreeSet<String>,
}

impl PlanMonitor {
    pub fn new(goals: Vec<GoapGoal>, actions: Vec<GoapAction>) -> Self {
        let mut goals = goals;
        goals.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Self {
            goals,
            actions,
            probe: PlannerOptions::default(),
            baseline: BTreeSet::new(),
        }
    }

    /// Bounds for the planner calls used to probe higher-priority goals.
    pub fn with_probe_options(mut self, probe: PlannerOptions) -> Self {
        self.probe = probe;
        self
    }

    /// Goals ordered by descending priority, then name.
    pub fn goals(&self) -> &[GoapGoal] {
        &self.goals
    }

    fn priority_of(&self, goal_id: &str) -> Option<i32> {
        self.goals
            .iter()
            .find(|g| g.name == goal_id)
            .map(|g| g.priority)
    }

    /// Unsatisfied goals strictly more urgent than `goal_id` that the planner can reach from
    /// `state`, most urgent first.
    fn achievable_higher_goals(&self, goal_id: &str, state: &WorldState) -> Result<Vec<String>> {
        let floor = self.priority_of(goal_id).unwrap_or(i32::MIN);
        let mut out = Vec::new();
        for goal in self.goals.iter().filter(|g| g.priority > floor) {
            if state.satisfies_goal(goal)? {
                continue;
            }
            if plan(state, goal, &self.actions, self.probe)?.plan.is_some() {
                out.push(goal.name.clone());
            }
        }
        Ok(out)
    }

    /// Record which higher-priority goals were already achievable when `plan` started.
    pub fn begin(&mut self, plan: &GoapPlan, state: &WorldState) -> Result<()> {
        self.baseline = self
            .achievable_higher_goals(&plan.goal_id, state)?
            .into_iter()
            .collect();
        Ok(())
    }

    pub fn validate(
        &self,
        plan: &GoapPlan,
        current_index: usize,
        state: &WorldState,
    ) -> Result<PlanValidation> {
        let Some(next) = plan.actions.get(current_index) else {
            return Ok(PlanValidation::invalid(ReplanReason::PlanCompleted));
        };

        if !state.satisfies(&next.preconditions)? {
            tracing::debug!(
                goal = %plan.goal_id,
                action = %next.id,
                "plan precondition invalidated"
            );
            return Ok(PlanValidation::invalid(
                ReplanReason::PreconditionInvalidated,
            ));
        }

        let newly = self
            .achievable_higher_goals(&plan.goal_id, state)?
            .into_iter()
            .find(|goal| !self.baseline.contains(goal));
        if let Some(goal) = newly {
            tracing::debug!(current = %plan.goal_id, better = %goal, "better goal available");
            return Ok(PlanValidation {
                is_valid: false,
                reason: Some(ReplanReason::BetterGoalAvailable),
                better_goal: Some(goal),
            });
        }

        Ok(PlanValidation::valid())
    }

    /// Highest-priority goal `state` does not yet satisfy.
    pub fn select_goal(&self, state: &WorldState) -> Result<Option<&GoapGoal>> {
        select_goal(&self.goals, state)
    }
}

/// Highest-priority unsatisfied goal; ties resolve by name.
pub fn select_goal<'a>(goals: &'a [GoapGoal], state: &WorldState) -> Result<Option<&'a GoapGoal>> {
    let mut best: Option<&GoapGoal> = None;
    for goal in goals {
        if state.satisfies_goal(goal)? {
            continue;
        }
        best = match best {
            Some(current)
                if current.priority > goal.priority
                    || (current.priority == goal.priority && current.name <= goal.name) =>
            {
                Some(current)
            }
            _ => Some(goal),
        };
    }
    Ok(best)
}
