//! GOAP integration: the `trigger_replan` action and plan-step dispatch through the executor.

use std::collections::BTreeMap;
use std::sync::Arc;

use ai_core::{CancellationToken, MapProvider, ScopeProvider, Value, VariableScope};
use ai_goap::{
    plan, Condition, Effect, GoapAction, GoapGoal, PlannerOptions, StepDispatcher, StepOutcome,
    WorldState, WorldValue,
};
use serde::{Deserialize, Serialize};

use crate::compiler::GoapCatalog;
use crate::error::{AbmlError, Result};
use crate::executor::{ExecutionReport, Executor};
use crate::model::{Block, Document};
use crate::registry::{ActionHandler, ActionRegistry, ActionRequest, ActionResult};

/// A planner invocation: start state, goal, candidate actions and search bounds.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub state: WorldState,
    pub goal: GoapGoal,
    pub actions: Vec<GoapAction>,
    pub options: PlannerOptions,
}

impl PlanRequest {
    /// Parse `{state, goal, actions, max_depth, max_nodes}`.
    ///
    /// `goal` is either a map (`{name, priority, conditions}`) or the name of a goal in
    /// `known_goals`; `actions` falls back to `known_actions` when absent.
    pub fn from_value(
        value: &Value,
        known_goals: &[GoapGoal],
        known_actions: &[GoapAction],
        defaults: PlannerOptions,
    ) -> Result<Self> {
        let state = match value.member("state") {
            None | Some(Value::Null) => WorldState::new(),
            Some(state @ Value::Map(_)) => WorldState::from_value(state),
            Some(other) => {
                return Err(invalid(format!(
                    "`state` must be a map, found {}",
                    other.type_name()
                )))
            }
        };

        let goal = match value.member("goal") {
            Some(Value::String(name)) => known_goals
                .iter()
                .find(|g| &g.name == name)
                .cloned()
                .ok_or_else(|| invalid(format!("unknown goal `{name}`")))?,
            Some(goal @ Value::Map(_)) => goal_from_value(goal)?,
            Some(other) => {
                return Err(invalid(format!(
                    "`goal` must be a name or a map, found {}",
                    other.type_name()
                )))
            }
            None => return Err(invalid("missing `goal`")),
        };

        let actions = match value.member("actions") {
            None | Some(Value::Null) => known_actions.to_vec(),
            Some(Value::List(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| action_from_value(item, i))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(invalid(format!(
                    "`actions` must be a list, found {}",
                    other.type_name()
                )))
            }
        };

        let mut options = defaults;
        if let Some(depth) = bound(value, "max_depth")? {
            options.max_depth = depth;
        }
        if let Some(nodes) = bound(value, "max_nodes")? {
            options.max_nodes_expanded = nodes;
        }

        Ok(Self {
            state,
            goal,
            actions,
            options,
        })
    }

    pub fn run(&self) -> Result<PlanResponse> {
        let outcome = plan(&self.state, &self.goal, &self.actions, self.options)?;
        let response = match outcome.plan {
            Some(plan) => PlanResponse {
                found: true,
                goal: self.goal.name.clone(),
                actions: plan.actions.iter().map(|a| a.id.clone()).collect(),
                total_cost: plan.total_cost,
                nodes_expanded: outcome.nodes_expanded,
            },
            None => PlanResponse {
                found: false,
                goal: self.goal.name.clone(),
                actions: Vec::new(),
                total_cost: 0.0,
                nodes_expanded: outcome.nodes_expanded,
            },
        };
        tracing::info!(
            goal = %response.goal,
            found = response.found,
            steps = response.actions.len(),
            expanded = response.nodes_expanded,
            "plan request"
        );
        Ok(response)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResponse {
    pub found: bool,
    pub goal: String,
    /// Action ids in execution order.
    pub actions: Vec<String>,
    pub total_cost: f64,
    pub nodes_expanded: usize,
}

impl From<PlanResponse> for Value {
    fn from(response: PlanResponse) -> Self {
        Value::map()
            .with("found", response.found)
            .with(
                "actions",
                response
                    .actions
                    .into_iter()
                    .map(Value::from)
                    .collect::<Vec<_>>(),
            )
            .with("goal", response.goal)
            .with("total_cost", response.total_cost)
            .with("nodes_expanded", response.nodes_expanded)
    }
}

fn invalid(message: impl Into<String>) -> AbmlError {
    AbmlError::PlanRequest {
        message: message.into(),
    }
}

fn bound(value: &Value, key: &str) -> Result<Option<usize>> {
    match value.member(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_f64() {
            Some(n) if n.is_finite() && n >= 0.0 => Ok(Some(n as usize)),
            _ => Err(invalid(format!("`{key}` must be a non-negative number"))),
        },
    }
}

fn world_value(value: &Value, what: &str) -> Result<WorldValue> {
    WorldValue::from_value(value)
        .ok_or_else(|| invalid(format!("{what} must be a number, bool or string")))
}

fn conditions(value: Option<&Value>, what: &str) -> Result<BTreeMap<String, Condition>> {
    let Some(map) = value.and_then(Value::as_map) else {
        return Ok(BTreeMap::new());
    };
    map.iter()
        .map(|(key, v)| {
            let condition = Condition::try_from(world_value(v, &format!("{what}.{key}"))?)?;
            Ok((key.clone(), condition))
        })
        .collect()
}

/// Goal from `{name, priority, conditions}`.
pub fn goal_from_value(value: &Value) -> Result<GoapGoal> {
    let name = value
        .member("name")
        .and_then(Value::as_str)
        .unwrap_or("goal");
    let priority = value
        .member("priority")
        .and_then(Value::as_f64)
        .unwrap_or(0.0) as i32;
    let mut goal = GoapGoal::new(name, priority);
    goal.conditions = conditions(value.member("conditions"), "goal.conditions")?;
    Ok(goal)
}

/// Action from `{id, name, preconditions, effects, cost}`; `cost` defaults to 1.
pub fn action_from_value(value: &Value, index: usize) -> Result<GoapAction> {
    let id = value
        .member("id")
        .or_else(|| value.member("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("action_{index}"));
    let cost = match value.member("cost") {
        None => 1.0,
        Some(cost) => cost
            .as_f64()
            .ok_or_else(|| invalid(format!("`{id}` cost must be a number")))?,
    };
    let mut action = GoapAction::new(id.clone(), cost);
    if let Some(name) = value.member("name").and_then(Value::as_str) {
        action = action.with_name(name);
    }
    action.preconditions = conditions(value.member("preconditions"), &format!("{id}.preconditions"))?;
    if let Some(effects) = value.member("effects").and_then(Value::as_map) {
        for (key, v) in effects {
            let effect = Effect::try_from(world_value(v, &format!("{id}.effects.{key}"))?)?;
            action.effects.insert(key.clone(), effect);
        }
    }
    action.validate()?;
    Ok(action)
}

/// `trigger_replan`: plan from the parameters and return the result to the calling channel.
///
/// Named goals and the default action set come from the [`GoapCatalog`] entry of the requesting
/// document. A missing plan is a normal result (`found: false`), not a failure.
#[derive(Debug, Clone)]
pub struct ReplanHandler {
    catalog: Arc<GoapCatalog>,
    options: PlannerOptions,
}

impl ReplanHandler {
    pub const ACTION_TYPE: &'static str = "trigger_replan";

    pub fn new(catalog: Arc<GoapCatalog>) -> Self {
        Self {
            catalog,
            options: PlannerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PlannerOptions) -> Self {
        self.options = options;
        self
    }

    /// Install under [`ReplanHandler::ACTION_TYPE`].
    pub fn install(self, registry: &mut ActionRegistry) -> Result<()> {
        registry.register(Self::ACTION_TYPE, Arc::new(self))
    }
}

impl ActionHandler for ReplanHandler {
    fn execute(&self, request: &ActionRequest<'_>) -> ActionResult {
        let entry = self.catalog.get(request.document_id);
        let goals = entry.as_ref().map(|e| &e.goals[..]).unwrap_or(&[]);
        let actions = entry.as_ref().map(|e| &e.actions[..]).unwrap_or(&[]);
        let response = PlanRequest::from_value(request.params, goals, actions, self.options)
            .and_then(|plan_request| plan_request.run());
        match response {
            Ok(response) => ActionResult::completed().with_value(response),
            Err(err) => ActionResult::failed(err.to_string()),
        }
    }
}

/// Runs GOAP plan steps as the document actions they were extracted from.
///
/// Each step executes as a one-step channel. Document variables carry over from one step to the
/// next; the current world state is readable through the `world` layer (`${world.gold}`).
pub struct FlowStepDispatcher<'e> {
    executor: &'e Executor,
    document: &'e Document,
    variables: BTreeMap<String, Value>,
    entity: Option<Arc<dyn ScopeProvider>>,
    cancel: CancellationToken,
    last_report: Option<ExecutionReport>,
}

impl<'e> FlowStepDispatcher<'e> {
    pub fn new(executor: &'e Executor, document: &'e Document) -> Self {
        Self {
            executor,
            document,
            variables: BTreeMap::new(),
            entity: None,
            cancel: CancellationToken::new(),
            last_report: None,
        }
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_entity(mut self, provider: Arc<dyn ScopeProvider>) -> Self {
        self.entity = Some(provider);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Document variables after the last dispatched step.
    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    pub fn last_report(&self) -> Option<&ExecutionReport> {
        self.last_report.as_ref()
    }

    fn scope(&self, state: &WorldState) -> VariableScope {
        let world: BTreeMap<String, Value> = state
            .facts()
            .iter()
            .map(|(key, value)| (key.clone(), value.to_value()))
            .collect();
        let scope = VariableScope::new()
            .with_variables(self.variables.clone())
            .with_world(Arc::new(MapProvider::read_only(world)));
        match &self.entity {
            Some(entity) => scope.with_entity(entity.clone()),
            None => scope,
        }
    }
}

impl StepDispatcher for FlowStepDispatcher<'_> {
    fn dispatch(&mut self, action: &GoapAction, state: &WorldState) -> StepOutcome {
        let Some(step) = self.document.goap_step(&action.id) else {
            return StepOutcome::Failed(format!(
                "document `{}` has no GOAP action `{}`",
                self.document.id, action.id
            ));
        };
        let block: Block = Arc::from(vec![step.clone()]);
        let report = self.executor.run_block(
            self.document,
            &action.id,
            block,
            self.scope(state),
            &self.cancel,
        );
        self.variables = report.scope.clone();
        let outcome = if report.is_complete() {
            StepOutcome::Succeeded
        } else {
            let message = report
                .unhandled_errors()
                .next()
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("step `{}` did not complete", action.id));
            StepOutcome::Failed(message)
        };
        self.last_report = Some(report);
        outcome
    }
}
