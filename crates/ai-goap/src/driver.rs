use ai_tools::{TraceEvent, Tracer};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{GoapAction, GoapGoal, GoapPlan};
use crate::monitor::{PlanMonitor, ReplanReason};
use crate::planner::GoapPlanner;
use crate::world::{StateKey, WorldState};

/// Cache/invalidation key for plan generation: the selected goal plus the start state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanKey {
    pub goal: String,
    pub start: StateKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanDriverConfig {
    /// Minimum interval (in driver ticks) between replans. This avoids thrash when inputs
    /// fluctuate.
    pub min_replan_interval_ticks: u32,

    /// Optional budget to prevent infinite restart loops.
    ///
    /// Counts how many times a plan was started for the same `(goal, start state)` key. This
    /// guards against "no progress" loops where every step reports success but the modeled
    /// effects never actually happen.
    pub max_plan_starts_per_key: Option<u32>,
}

impl Default for PlanDriverConfig {
    fn default() -> Self {
        Self {
            min_replan_interval_ticks: 0,
            max_plan_starts_per_key: None,
        }
    }
}

/// Result of running one plan step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Running,
    Failed(String),
}

/// Executes plan steps on behalf of the driver.
pub trait StepDispatcher {
    fn dispatch(&mut self, action: &GoapAction, state: &WorldState) -> StepOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStatus {
    /// Every goal holds.
    Satisfied,
    Running,
    /// No plan exists (or the restart budget ran out); the caller decides the fallback.
    Failed,
}

#[derive(Debug, Clone)]
struct PlanCacheEntry {
    key: PlanKey,
    plan: Option<GoapPlan>,
}

#[derive(Debug, Clone)]
struct ActivePlan {
    plan: GoapPlan,
    index: usize,
}

/// Tick-driven goal selection, planning, monitoring and step dispatch.
///
/// - Plans only when needed (plan cache keyed by goal and start state).
/// - Validates every step through [`PlanMonitor`] and replans on invalidation.
/// - Treats a finished plan whose goal is still unmet as "no progress": clears the cache and
///   forces a replan instead of repeating a stale plan.
/// - Optionally throttles replanning and caps restarts per key.
pub struct PlanDriver {
    planner: GoapPlanner,
    monitor: PlanMonitor,
    config: PlanDriverConfig,
    tracer: Tracer,

    active: Option<ActivePlan>,
    cache: Option<PlanCacheEntry>,
    pending_replan: bool,
    interrupted: bool,
    last_planned_tick: Option<u64>,
    last_reason: Option<ReplanReason>,
    plan_calls: u64,
    plan_starts: u64,
    starts_for_key: u32,
    last_started_key: Option<PlanKey>,
}

impl PlanDriver {
    pub fn new(planner: GoapPlanner, goals: Vec<GoapGoal>) -> Self {
        planner.check_admissibility(&goals);
        let monitor = PlanMonitor::new(goals, planner.actions().to_vec())
            .with_probe_options(planner.options());
        Self {
            planner,
            monitor,
            config: PlanDriverConfig::default(),
            tracer: Tracer::disabled(),
            active: None,
            cache: None,
            pending_replan: true, // plan immediately on first tick
            interrupted: false,
            last_planned_tick: None,
            last_reason: None,
            plan_calls: 0,
            plan_starts: 0,
            starts_for_key: 0,
            last_started_key: None,
        }
    }

    pub fn with_config(mut self, config: PlanDriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    pub fn current_plan(&self) -> Option<&GoapPlan> {
        self.active.as_ref().map(|a| &a.plan)
    }

    pub fn current_step(&self) -> Option<usize> {
        self.active.as_ref().map(|a| a.index)
    }

    /// Number of times the planner was invoked (cache misses).
    pub fn plan_calls(&self) -> u64 {
        self.plan_calls
    }

    /// Number of times a plan was started (including starts using a cached plan).
    pub fn plan_starts(&self) -> u64 {
        self.plan_starts
    }

    pub fn last_reason(&self) -> Option<ReplanReason> {
        self.last_reason
    }

    /// Report an external change; the current plan is dropped on the next tick.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    fn can_replan_now(&self, tick: u64) -> bool {
        let min = self.config.min_replan_interval_ticks as u64;
        match self.last_planned_tick {
            None => true,
            Some(last) => tick.saturating_sub(last) >= min,
        }
    }

    fn would_exceed_budget(&self, key: &PlanKey) -> bool {
        let Some(max) = self.config.max_plan_starts_per_key else {
            return false;
        };
        let starts = if self.last_started_key.as_ref() == Some(key) {
            self.starts_for_key
        } else {
            0
        };
        starts.saturating_add(1) > max
    }

    fn note_plan_start(&mut self, key: PlanKey, tick: u64) {
        if self.last_started_key.as_ref() != Some(&key) {
            self.starts_for_key = 0;
        }
        self.starts_for_key = self.starts_for_key.saturating_add(1);
        self.last_started_key = Some(key);
        self.plan_starts = self.plan_starts.saturating_add(1);
        self.last_planned_tick = Some(tick);
        self.pending_replan = false;
    }

    fn invalidate(&mut self, tick: u64, reason: ReplanReason, detail: String) {
        self.active = None;
        self.cache = None;
        self.pending_replan = true;
        self.last_reason = Some(reason);
        tracing::info!(%reason, %detail, "replanning");
        self.tracer.emit(
            TraceEvent::new(tick, "goap.replan")
                .with_subject(reason.as_str())
                .with_detail(detail),
        );
    }

    fn get_or_plan(&mut self, tick: u64, key: &PlanKey, state: &WorldState) -> Result<Option<GoapPlan>> {
        if let Some(entry) = self.cache.as_ref() {
            if &entry.key == key {
                return Ok(entry.plan.clone());
            }
        }

        let Some(goal) = self.monitor.goals().iter().find(|g| g.name == key.goal).cloned() else {
            return Ok(None);
        };
        self.plan_calls = self.plan_calls.saturating_add(1);
        self.tracer
            .emit(TraceEvent::new(tick, "goap.plan.call").with_subject(goal.name.clone()));
        let outcome = self.planner.plan(state, &goal)?;
        self.tracer.emit(
            TraceEvent::new(tick, "goap.plan.result")
                .with_subject(goal.name.clone())
                .with_detail(format!(
                    "steps={} expanded={}",
                    outcome.plan.as_ref().map(GoapPlan::len).unwrap_or(0),
                    outcome.nodes_expanded
                )),
        );
        self.cache = Some(PlanCacheEntry {
            key: key.clone(),
            plan: outcome.plan.clone(),
        });
        Ok(outcome.plan)
    }

    pub fn tick(
        &mut self,
        tick: u64,
        state: &WorldState,
        dispatcher: &mut dyn StepDispatcher,
    ) -> Result<DriveStatus> {
        if std::mem::take(&mut self.interrupted) && self.active.is_some() {
            self.invalidate(tick, ReplanReason::ExternalInterrupt, String::new());
        }

        let Some(goal) = self.monitor.select_goal(state)?.cloned() else {
            self.active = None;
            self.pending_replan = false;
            self.tracer.emit(TraceEvent::new(tick, "goap.done"));
            return Ok(DriveStatus::Satisfied);
        };

        if let Some(active) = self.active.as_ref() {
            if active.plan.goal_id != goal.name {
                // The planned goal is satisfied (or outranked); move on to the selected one.
                let detail = format!("{} -> {}", active.plan.goal_id, goal.name);
                self.invalidate(tick, ReplanReason::BetterGoalAvailable, detail);
            }
        }

        if let Some(active) = self.active.as_ref() {
            let validation = self.monitor.validate(&active.plan, active.index, state)?;
            match validation.reason {
                None => {}
                Some(ReplanReason::PlanCompleted) => {
                    // Every step succeeded but the goal is still unmet.
                    self.tracer.emit(
                        TraceEvent::new(tick, "goap.no_progress").with_subject(goal.name.clone()),
                    );
                    self.invalidate(tick, ReplanReason::PlanCompleted, goal.name.clone());
                }
                Some(reason) => {
                    let detail = validation.better_goal.unwrap_or_else(|| goal.name.clone());
                    self.invalidate(tick, reason, detail);
                }
            }
        }

        if self.active.is_none() {
            if self.pending_replan && !self.can_replan_now(tick) {
                return Ok(DriveStatus::Running);
            }

            let key = PlanKey {
                goal: goal.name.clone(),
                start: state.key(),
            };

            if self.would_exceed_budget(&key) {
                self.pending_replan = false;
                self.cache = None;
                self.tracer.emit(
                    TraceEvent::new(tick, "goap.budget_exhausted").with_subject(goal.name.clone()),
                );
                return Ok(DriveStatus::Failed);
            }

            let Some(plan) = self.get_or_plan(tick, &key, state)? else {
                // No plan available; a state or goal change triggers another attempt.
                self.pending_replan = false;
                tracing::info!(goal = %goal.name, "no plan found");
                self.tracer
                    .emit(TraceEvent::new(tick, "goap.plan.none").with_subject(goal.name.clone()));
                return Ok(DriveStatus::Failed);
            };

            self.note_plan_start(key, tick);
            self.monitor.begin(&plan, state)?;
            self.tracer.emit(
                TraceEvent::new(tick, "goap.plan.start")
                    .with_subject(goal.name.clone())
                    .with_detail(plan.action_ids().join(",")),
            );
            self.active = Some(ActivePlan { plan, index: 0 });
        }

        let Some(active) = self.active.as_mut() else {
            return Ok(DriveStatus::Running);
        };
        let Some(action) = active.plan.actions.get(active.index) else {
            return Ok(DriveStatus::Running);
        };

        match dispatcher.dispatch(action, state) {
            StepOutcome::Succeeded => {
                let id = action.id.clone();
                active.index += 1;
                self.tracer
                    .emit(TraceEvent::new(tick, "goap.step.done").with_subject(id));
            }
            StepOutcome::Running => {}
            StepOutcome::Failed(message) => {
                let id = action.id.clone();
                self.tracer.emit(
                    TraceEvent::new(tick, "goap.step.failed")
                        .with_subject(id.clone())
                        .with_detail(message.clone()),
                );
                self.invalidate(tick, ReplanReason::ActionFailed, format!("{id}: {message}"));
            }
        }

        Ok(DriveStatus::Running)
    }
}
