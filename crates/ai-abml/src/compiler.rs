//! Raw document to [`Document`] lowering and validation.
//!
//! All problems are collected and reported together as [`AbmlError::Compile`]. Expressions are
//! compiled through the global expression cache, so syntax errors and unknown functions surface
//! here rather than mid-execution.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ai_core::{ErrorCode, Value};
use ai_expr::{ExpressionCache, Template};
use ai_goap::{Condition, Effect, GoapAction, GoapGoal, WorldValue};
use dashmap::DashMap;

use crate::document::{parse_duration, RawDocument, RawGoal};
use crate::error::{AbmlError, Diagnostic, Result};
use crate::model::{
    AwaitMode, Block, Channel, CondBranch, Document, GoapAnnotation, Step, StepKind, WaitMode,
    WaitSpec,
};
use crate::registry::{is_builtin, ActionRegistry};
use crate::waitgraph::WaitGraph;

const RESERVED_KEYS: [&str; 4] = ["on_error", "await", "goap", "result"];

/// Name of the channel synthesized for documents that declare none.
pub const IMPLICIT_CHANNEL: &str = "main";

/// GOAP goals and annotated actions of compiled documents, keyed by document id.
#[derive(Debug, Default)]
pub struct GoapCatalog {
    entries: DashMap<String, CatalogEntry>,
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub goals: Arc<[GoapGoal]>,
    pub actions: Arc<[GoapAction]>,
}

impl GoapCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the GOAP side table of `document`.
    pub fn register(&self, document: &Document) {
        self.entries.insert(
            document.id.clone(),
            CatalogEntry {
                goals: document.goals.clone().into(),
                actions: document.goap_actions.clone().into(),
            },
        );
    }

    pub fn get(&self, document_id: &str) -> Option<CatalogEntry> {
        self.entries.get(document_id).map(|entry| entry.clone())
    }

    pub fn actions(&self, document_id: &str) -> Option<Arc<[GoapAction]>> {
        self.entries
            .get(document_id)
            .map(|entry| entry.actions.clone())
    }

    pub fn goals(&self, document_id: &str) -> Option<Arc<[GoapGoal]>> {
        self.entries.get(document_id).map(|entry| entry.goals.clone())
    }

    pub fn remove(&self, document_id: &str) -> Option<CatalogEntry> {
        self.entries.remove(document_id).map(|(_, entry)| entry)
    }

    pub fn document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct Compiler {
    cache: &'static ExpressionCache,
    known_types: Option<BTreeSet<String>>,
    catalog: Option<Arc<GoapCatalog>>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            cache: ai_expr::global(),
            known_types: None,
            catalog: None,
        }
    }

    /// Reject action types outside `known_types` (built-ins are always accepted).
    pub fn with_known_types(mut self, known_types: BTreeSet<String>) -> Self {
        self.known_types = Some(known_types);
        self
    }

    pub fn with_registry(self, registry: &ActionRegistry) -> Self {
        self.with_known_types(registry.known_types())
    }

    /// Register every compiled document's GOAP goals and actions in `catalog`.
    pub fn with_catalog(mut self, catalog: Arc<GoapCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn compile_yaml(&self, source: &str) -> Result<Document> {
        self.compile(&RawDocument::from_yaml(source)?)
    }

    pub fn compile(&self, raw: &RawDocument) -> Result<Document> {
        let mut lowering = Lowering {
            compiler: self,
            raw,
            diagnostics: Vec::new(),
            goap: Vec::new(),
            branch_targets: BTreeSet::new(),
        };
        let document = lowering.document();
        let document_id = raw.id().unwrap_or("<unnamed>").to_string();

        if !lowering.diagnostics.is_empty() {
            tracing::debug!(
                document = %document_id,
                count = lowering.diagnostics.len(),
                "document rejected"
            );
            return Err(AbmlError::Compile {
                document_id,
                diagnostics: lowering.diagnostics,
            });
        }

        if let Some(catalog) = &self.catalog {
            catalog.register(&document);
        }
        tracing::debug!(
            document = %document.id,
            channels = document.channels.len(),
            flows = document.flows.len(),
            goap_actions = document.goap_actions.len(),
            "document compiled"
        );
        Ok(document)
    }
}

struct Lowering<'a> {
    compiler: &'a Compiler,
    raw: &'a RawDocument,
    diagnostics: Vec<Diagnostic>,
    goap: Vec<(String, GoapAnnotation, Step)>,
    branch_targets: BTreeSet<String>,
}

impl Lowering<'_> {
    fn error(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(location, message));
    }

    fn document(&mut self) -> Document {
        let raw = self.raw;
        let id = match raw.id() {
            Some(id) => id.to_string(),
            None => {
                self.error("metadata.id", "document id is required");
                String::new()
            }
        };

        let flows: BTreeMap<String, Block> = raw
            .flows
            .iter()
            .map(|(name, items)| (name.clone(), self.block(items, &format!("flows.{name}"))))
            .collect();

        let declared: Vec<(String, Block)> = raw
            .channels
            .iter()
            .map(|(name, items)| (name.clone(), self.block(items, &format!("channels.{name}"))))
            .collect();

        let mut error_handlers = BTreeMap::new();
        for (key, items) in &raw.errors {
            if key != "default" && ErrorCode::parse(key).is_none() {
                self.error(format!("errors.{key}"), format!("unknown error code `{key}`"));
            }
            error_handlers.insert(key.clone(), self.block(items, &format!("errors.{key}")));
        }

        let channels = self.channels(declared, &flows);
        let goals = self.goals();
        let (goap_actions, goap_steps) = self.goap_actions();
        let emitters = emitters(&channels, &flows);
        self.check_static_waits(&channels, &flows);

        Document {
            id,
            document_type: raw.document_type,
            variables: raw.variables.clone(),
            goals,
            flows,
            channels,
            error_handlers,
            goap_actions,
            goap_steps,
            emitters,
        }
    }

    fn channels(
        &mut self,
        declared: Vec<(String, Block)>,
        flows: &BTreeMap<String, Block>,
    ) -> Vec<Channel> {
        if declared.is_empty() {
            let entry = flows.get("start").or_else(|| flows.get("main"));
            return match entry {
                Some(steps) => vec![Channel {
                    name: IMPLICIT_CHANNEL.to_string(),
                    steps: steps.clone(),
                    auto_start: true,
                }],
                None => {
                    self.error(
                        "channels",
                        "document declares no channels and no `start` or `main` flow",
                    );
                    Vec::new()
                }
            };
        }

        let channels: Vec<Channel> = declared
            .into_iter()
            .map(|(name, steps)| Channel {
                auto_start: !self.branch_targets.contains(&name),
                name,
                steps,
            })
            .collect();
        if !channels.iter().any(|c| c.auto_start) {
            self.error(
                "channels",
                "every channel is a branch target; nothing starts automatically",
            );
        }
        channels
    }

    fn goals(&mut self) -> Vec<GoapGoal> {
        let raw = self.raw;
        let mut goals = Vec::new();
        for (name, RawGoal { priority, conditions }) in &raw.goals {
            let mut goal = GoapGoal::new(name.clone(), *priority);
            for (key, value) in conditions {
                let location = format!("goals.{name}.conditions.{key}");
                if let Some(condition) = self.condition(value, &location) {
                    goal.conditions.insert(key.clone(), condition);
                }
            }
            goals.push(goal);
        }
        goals.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        goals
    }

    fn goap_actions(&mut self) -> (Vec<GoapAction>, BTreeMap<String, Step>) {
        let mut actions = Vec::new();
        let mut steps = BTreeMap::new();
        for (id, annotation, step) in std::mem::take(&mut self.goap) {
            if steps.contains_key(&id) {
                self.error(
                    format!("{}.goap", step.location),
                    format!("duplicate GOAP action id `{id}`"),
                );
                continue;
            }
            actions.push(GoapAction {
                id: id.clone(),
                name: id.clone(),
                preconditions: annotation.preconditions,
                effects: annotation.effects,
                cost: annotation.cost,
            });
            steps.insert(id, step);
        }
        (actions, steps)
    }

    fn block(&mut self, items: &[Value], location: &str) -> Block {
        let steps: Vec<Step> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| self.step(item, format!("{location}[{i}]")))
            .collect();
        steps.into()
    }

    fn optional_block(&mut self, value: Option<&Value>, location: &str) -> Option<Block> {
        match value? {
            Value::List(items) => Some(self.block(items, location)),
            Value::Null => None,
            other => {
                self.error(
                    location,
                    format!("expected an action list, found {}", other.type_name()),
                );
                None
            }
        }
    }

    fn step(&mut self, value: &Value, location: String) -> Option<Step> {
        let map = match value {
            Value::Map(map) => map,
            // Bare `- return`.
            Value::String(name) if name == "return" => {
                return Some(Step::new(StepKind::Return, location));
            }
            other => {
                self.error(
                    &location,
                    format!("action must be a map, found {}", other.type_name()),
                );
                return None;
            }
        };

        let (action_type, params) = self.split_action(map, &location)?;
        let kind = self.kind(&action_type, &params, &location)?;
        let mut step = Step::new(kind, location.clone());

        step.on_error = self.optional_block(map.get("on_error"), &format!("{location}.on_error"));
        if let Some(mode) = map.get("await") {
            step.await_mode = match mode {
                Value::Bool(true) => AwaitMode::Completion,
                Value::Bool(false) => AwaitMode::FireAndForget,
                Value::String(s) if s == "completion" || s == "true" => AwaitMode::Completion,
                Value::String(s) if matches!(s.as_str(), "none" | "fire_and_forget" | "false") => {
                    AwaitMode::FireAndForget
                }
                other => {
                    self.error(
                        format!("{location}.await"),
                        format!("invalid await mode `{other}`"),
                    );
                    AwaitMode::Completion
                }
            };
        }
        if let Some(result) = map.get("result") {
            step.result = self.static_name(Some(result), "result variable", &location);
        }
        if let Some(goap) = map.get("goap") {
            if let Some((id, annotation)) = self.goap_annotation(goap, &location) {
                step.goap = Some(annotation.clone());
                self.goap.push((id, annotation, step.clone()));
            }
        }
        Some(step)
    }

    /// Normalize explicit and shorthand forms into `(type, params)`.
    fn split_action(
        &mut self,
        map: &BTreeMap<String, Value>,
        location: &str,
    ) -> Option<(String, BTreeMap<String, Value>)> {
        let is_param = |key: &str| !RESERVED_KEYS.contains(&key);

        if let Some(action_type) = map.get("type") {
            let Some(action_type) = action_type.as_str() else {
                self.error(format!("{location}.type"), "action type must be a string");
                return None;
            };
            let params = map
                .iter()
                .filter(|(k, _)| k.as_str() != "type" && is_param(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            return Some((action_type.to_string(), params));
        }

        let candidates: Vec<&String> = map.keys().filter(|k| is_param(k.as_str())).collect();
        let action_key = match candidates.as_slice() {
            [] => {
                self.error(location, "action has no type");
                return None;
            }
            [only] => only.to_string(),
            many => {
                let builtins: Vec<&&String> =
                    many.iter().filter(|k| is_builtin(k.as_str())).collect();
                match builtins.as_slice() {
                    [only] => only.to_string(),
                    _ => {
                        self.error(
                            location,
                            format!(
                                "ambiguous shorthand action with keys {}; add an explicit `type`",
                                many.iter()
                                    .map(|k| format!("`{k}`"))
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            ),
                        );
                        return None;
                    }
                }
            }
        };

        let mut params: BTreeMap<String, Value> = map
            .iter()
            .filter(|(k, _)| **k != action_key && is_param(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        match map.get(&action_key) {
            Some(Value::Map(inner)) => {
                params.extend(inner.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(Value::Null) | None => {}
            Some(primary) => {
                params.insert(primary_param(&action_key).to_string(), primary.clone());
            }
        }
        Some((action_key, params))
    }

    fn kind(
        &mut self,
        action_type: &str,
        params: &BTreeMap<String, Value>,
        location: &str,
    ) -> Option<StepKind> {
        let kind = match action_type {
            "set" => StepKind::Set {
                variable: self.static_name(params.get("variable"), "variable", location)?,
                value: self.template(params.get("value").unwrap_or(&Value::Null), location)?,
            },
            "increment" | "decrement" => StepKind::Increment {
                variable: self.static_name(params.get("variable"), "variable", location)?,
                amount: self.template(
                    params
                        .get("by")
                        .or_else(|| params.get("amount"))
                        .unwrap_or(&Value::Number(1.0)),
                    location,
                )?,
                decrement: action_type == "decrement",
            },
            "cond" => self.cond(params, location)?,
            "for_each" => StepKind::ForEach {
                variable: self.static_name(params.get("variable"), "variable", location)?,
                collection: match params.get("collection") {
                    Some(value) => self.template(value, location)?,
                    None => {
                        self.error(location, "`for_each` needs a `collection`");
                        return None;
                    }
                },
                body: self.body(params, location),
            },
            "repeat" => StepKind::Repeat {
                times: match params.get("times") {
                    Some(value) => self.template(value, location)?,
                    None => {
                        self.error(location, "`repeat` needs `times`");
                        return None;
                    }
                },
                variable: match params.get("variable") {
                    Some(v) => Some(self.static_name(Some(v), "variable", location)?),
                    None => None,
                },
                body: self.body(params, location),
            },
            "goto" | "call" => {
                let flow = self.static_name(params.get("flow"), "flow name", location)?;
                if !self.raw.flows.contains_key(&flow) {
                    if self.raw.channels.contains_key(&flow) {
                        self.error(
                            location,
                            format!(
                                "`{action_type}` targets channel `{flow}`; use `branch` to transfer to another channel"
                            ),
                        );
                    } else {
                        self.error(location, format!("unknown flow `{flow}`"));
                    }
                }
                if action_type == "goto" {
                    StepKind::Goto { flow }
                } else {
                    StepKind::Call { flow }
                }
            }
            "return" => StepKind::Return,
            "branch" => {
                let channel = self.static_name(params.get("channel"), "channel name", location)?;
                if !self.raw.channels.contains_key(&channel) {
                    if self.raw.flows.contains_key(&channel) {
                        self.error(
                            location,
                            format!(
                                "`branch` targets flow `{channel}`; use `goto` or `call` within a channel"
                            ),
                        );
                    } else {
                        self.error(location, format!("unknown channel `{channel}`"));
                    }
                } else if location.starts_with(&format!("channels.{channel}[")) {
                    self.error(location, format!("channel `{channel}` branches to itself"));
                }
                self.branch_targets.insert(channel.clone());
                StepKind::Branch { channel }
            }
            "emit" => StepKind::Emit {
                point: self.static_name(params.get("point"), "sync point", location)?,
            },
            "wait_for" => StepKind::WaitFor(self.wait_spec(params, location)?),
            other => {
                if let Some(known) = &self.compiler.known_types {
                    if !known.contains(other) {
                        self.error(location, format!("unknown action type `{other}`"));
                        return None;
                    }
                }
                StepKind::Domain {
                    action_type: other.to_string(),
                    params: self.template(&Value::Map(params.clone()), location)?,
                }
            }
        };
        Some(kind)
    }

    fn body(&mut self, params: &BTreeMap<String, Value>, location: &str) -> Block {
        self.optional_block(params.get("do"), &format!("{location}.do"))
            .unwrap_or_else(|| Vec::new().into())
    }

    fn cond(&mut self, params: &BTreeMap<String, Value>, location: &str) -> Option<StepKind> {
        let mut branches = Vec::new();
        let mut otherwise = None;

        if let Some(when) = params.get("if") {
            let when = self.condition_template(when, &format!("{location}.if"))?;
            let then = self
                .optional_block(params.get("then"), &format!("{location}.then"))
                .unwrap_or_else(|| Vec::new().into());
            branches.push(CondBranch { when, then });
            otherwise = self.optional_block(params.get("else"), &format!("{location}.else"));
        } else if let Some(Value::List(items)) = params.get("branches") {
            for (i, item) in items.iter().enumerate() {
                let branch_location = format!("{location}[{i}]");
                if let Some(body) = item.member("else") {
                    if otherwise.is_some() {
                        self.error(&branch_location, "`cond` has more than one `else`");
                    }
                    otherwise = self.optional_block(Some(body), &format!("{branch_location}.else"));
                    continue;
                }
                let Some(when) = item.member("when").or_else(|| item.member("if")) else {
                    self.error(&branch_location, "branch needs `when` (or `else`)");
                    continue;
                };
                let Some(when) = self.condition_template(when, &format!("{branch_location}.when"))
                else {
                    continue;
                };
                let then = self
                    .optional_block(item.member("then"), &format!("{branch_location}.then"))
                    .unwrap_or_else(|| Vec::new().into());
                branches.push(CondBranch { when, then });
            }
        } else {
            self.error(location, "`cond` needs a branch list or an `if`/`then` map");
            return None;
        }

        if branches.is_empty() {
            self.error(location, "`cond` has no conditional branch");
        }
        Some(StepKind::Cond {
            branches,
            otherwise,
        })
    }

    fn wait_spec(&mut self, params: &BTreeMap<String, Value>, location: &str) -> Option<WaitSpec> {
        let (raw_points, mode) = if let Some(points) = params.get("any_of") {
            (points, WaitMode::AnyOf)
        } else if let Some(points) = params.get("all_of") {
            (points, WaitMode::AllOf)
        } else if let Some(point) = params.get("point") {
            (point, WaitMode::Single)
        } else if let Some(points) = params.get("points") {
            let mode = match points {
                Value::List(items) if items.len() > 1 => WaitMode::AllOf,
                _ => WaitMode::Single,
            };
            (points, mode)
        } else {
            self.error(location, "`wait_for` needs a sync point");
            return None;
        };

        let points: Vec<String> = match raw_points {
            Value::List(items) => items
                .iter()
                .filter_map(|item| self.static_name(Some(item), "sync point", location))
                .collect(),
            single => vec![self.static_name(Some(single), "sync point", location)?],
        };
        if points.is_empty() {
            self.error(location, "`wait_for` needs at least one sync point");
            return None;
        }

        let timeout = match params.get("timeout") {
            None => None,
            Some(value) => match parse_duration(value) {
                Some(timeout) => Some(timeout),
                None => {
                    self.error(
                        format!("{location}.timeout"),
                        format!("invalid duration `{value}`"),
                    );
                    None
                }
            },
        };
        let on_timeout =
            self.optional_block(params.get("on_timeout"), &format!("{location}.on_timeout"));
        if on_timeout.is_some() && timeout.is_none() {
            self.error(location, "`on_timeout` without a `timeout`");
        }

        Some(WaitSpec {
            points,
            mode,
            timeout,
            on_timeout,
        })
    }

    fn goap_annotation(&mut self, value: &Value, location: &str) -> Option<(String, GoapAnnotation)> {
        let location = format!("{location}.goap");
        let Some(map) = value.as_map() else {
            self.error(&location, "`goap` must be a map");
            return None;
        };

        let mut annotation = GoapAnnotation {
            preconditions: BTreeMap::new(),
            effects: BTreeMap::new(),
            cost: 1.0,
        };
        if let Some(preconditions) = map.get("preconditions").and_then(Value::as_map) {
            for (key, value) in preconditions {
                if let Some(condition) =
                    self.condition(value, &format!("{location}.preconditions.{key}"))
                {
                    annotation.preconditions.insert(key.clone(), condition);
                }
            }
        }
        if let Some(effects) = map.get("effects").and_then(Value::as_map) {
            for (key, value) in effects {
                let effect_location = format!("{location}.effects.{key}");
                let Some(world) = WorldValue::from_value(value) else {
                    self.error(effect_location, "effects must be numbers, booleans or strings");
                    continue;
                };
                match Effect::try_from(world) {
                    Ok(effect) => {
                        annotation.effects.insert(key.clone(), effect);
                    }
                    Err(err) => self.error(effect_location, err.to_string()),
                }
            }
        }
        match map.get("cost") {
            None => {}
            Some(Value::Number(cost)) if *cost >= 0.0 => annotation.cost = *cost,
            Some(other) => {
                self.error(
                    format!("{location}.cost"),
                    format!("cost must be a non-negative number, found `{other}`"),
                );
            }
        }

        let id = match map.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => action_id_from_location(location.trim_end_matches(".goap")),
        };
        Some((id, annotation))
    }

    fn condition(&mut self, value: &Value, location: &str) -> Option<Condition> {
        let Some(world) = WorldValue::from_value(value) else {
            self.error(location, "conditions must be numbers, booleans or strings");
            return None;
        };
        match Condition::try_from(world) {
            Ok(condition) => Some(condition),
            Err(err) => {
                self.error(location, err.to_string());
                None
            }
        }
    }

    /// A statically known identifier (variable, flow, channel, sync point).
    fn static_name(&mut self, value: Option<&Value>, what: &str, location: &str) -> Option<String> {
        match value {
            Some(Value::String(name)) if name.contains("${") => {
                self.error(location, format!("{what} `{name}` must be static"));
                None
            }
            Some(Value::String(name)) if !name.trim().is_empty() => Some(name.trim().to_string()),
            Some(other) => {
                self.error(location, format!("invalid {what} `{other}`"));
                None
            }
            None => {
                self.error(location, format!("missing {what}"));
                None
            }
        }
    }

    fn template(&mut self, value: &Value, location: &str) -> Option<Template> {
        match Template::compile(value, self.compiler.cache) {
            Ok(template) => Some(template),
            Err(err) => {
                self.error(location, err.to_string());
                None
            }
        }
    }

    /// Conditions may be written bare (`x > 1`) as well as wrapped (`${x > 1}`).
    fn condition_template(&mut self, value: &Value, location: &str) -> Option<Template> {
        match value {
            Value::String(source) if !source.contains("${") => {
                match self.compiler.cache.compile(source) {
                    Ok(compiled) => Some(Template::Expression(compiled)),
                    Err(err) => {
                        self.error(location, err.to_string());
                        None
                    }
                }
            }
            other => self.template(other, location),
        }
    }

    /// Report guaranteed deadlocks visible without running the document.
    ///
    /// Each auto-started channel is profiled up to its first control transfer: the points it
    /// emits unconditionally and the first wait without a timeout. A channel stays "stuck" while
    /// its wait cannot be satisfied by pre-wait emits or by channels that are not stuck. If the
    /// fixpoint leaves stuck channels that wait on each other, the cycle is an error.
    fn check_static_waits(&mut self, channels: &[Channel], flows: &BTreeMap<String, Block>) {
        struct Profile<'c> {
            name: &'c str,
            pre_emits: BTreeSet<&'c str>,
            wait: Option<&'c WaitSpec>,
            may_emit: BTreeSet<String>,
        }

        let profiles: Vec<Profile<'_>> = channels
            .iter()
            .map(|channel| {
                let mut pre_emits = BTreeSet::new();
                let mut wait = None;
                for step in channel.steps.iter() {
                    match &step.kind {
                        StepKind::Emit { point } => {
                            pre_emits.insert(point.as_str());
                        }
                        StepKind::WaitFor(spec) if spec.timeout.is_none() => {
                            wait = Some(spec);
                            break;
                        }
                        StepKind::WaitFor(_)
                        | StepKind::Set { .. }
                        | StepKind::Increment { .. }
                        | StepKind::Domain { .. } => {}
                        _ => break,
                    }
                }
                let mut may_emit = BTreeSet::new();
                collect_emits(&channel.steps, flows, &mut BTreeSet::new(), &mut may_emit);
                Profile {
                    name: &channel.name,
                    pre_emits,
                    wait: if channel.auto_start { wait } else { None },
                    may_emit,
                }
            })
            .collect();

        let mut stuck: BTreeSet<&str> = profiles
            .iter()
            .filter(|p| p.wait.is_some())
            .map(|p| p.name)
            .collect();

        let available = |point: &str, stuck: &BTreeSet<&str>| {
            profiles.iter().any(|p| {
                p.pre_emits.contains(point)
                    || (!stuck.contains(p.name) && p.may_emit.contains(point))
            })
        };

        loop {
            let released: Vec<&str> = profiles
                .iter()
                .filter(|p| stuck.contains(p.name))
                .filter(|p| {
                    let Some(spec) = p.wait else { return true };
                    match spec.mode {
                        WaitMode::AllOf => spec.points.iter().all(|pt| available(pt.as_str(), &stuck)),
                        WaitMode::Single | WaitMode::AnyOf => {
                            spec.points.iter().any(|pt| available(pt.as_str(), &stuck))
                        }
                    }
                })
                .map(|p| p.name)
                .collect();
            if released.is_empty() {
                break;
            }
            for name in released {
                stuck.remove(name);
            }
        }

        if stuck.is_empty() {
            return;
        }

        let mut graph = WaitGraph::new();
        for waiter in profiles.iter().filter(|p| stuck.contains(p.name)) {
            let Some(spec) = waiter.wait else { continue };
            graph.add_node(waiter.name);
            for point in spec.points.iter().filter(|pt| !available(pt.as_str(), &stuck)) {
                for producer in profiles.iter().filter(|p| stuck.contains(p.name)) {
                    if producer.may_emit.contains(point.as_str()) {
                        graph.add_edge(waiter.name, producer.name);
                    }
                }
            }
        }

        match graph.find_cycle() {
            Some(cycle) => {
                let path = cycle
                    .iter()
                    .chain(cycle.first())
                    .map(|c| format!("`{c}`"))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                self.error(
                    "channels",
                    format!("wait cycle {path}: these channels wait on each other and can never proceed"),
                );
            }
            None => {
                for name in stuck {
                    tracing::warn!(channel = name, "channel waits on a sync point no running channel emits");
                }
            }
        }
    }
}

fn primary_param(action_type: &str) -> &'static str {
    match action_type {
        "emit" => "point",
        "wait_for" => "points",
        "goto" | "call" => "flow",
        "branch" => "channel",
        "cond" => "branches",
        "repeat" => "times",
        "for_each" => "collection",
        "set" | "increment" | "decrement" => "variable",
        "log" => "message",
        _ => "value",
    }
}

/// `flows.start[2].then[0]` -> `start.2.then.0`.
fn action_id_from_location(location: &str) -> String {
    let trimmed = location
        .strip_prefix("flows.")
        .or_else(|| location.strip_prefix("channels."))
        .unwrap_or(location);
    trimmed.replace('[', ".").replace(']', "")
}

/// Every sync point a block may emit, following `goto`/`call` into flows.
fn collect_emits(
    steps: &Block,
    flows: &BTreeMap<String, Block>,
    visited: &mut BTreeSet<String>,
    out: &mut BTreeSet<String>,
) {
    for step in steps.iter() {
        match &step.kind {
            StepKind::Emit { point } => {
                out.insert(point.clone());
            }
            StepKind::Goto { flow } | StepKind::Call { flow } => {
                if visited.insert(flow.clone()) {
                    if let Some(body) = flows.get(flow) {
                        collect_emits(body, flows, visited, out);
                    }
                }
            }
            kind => {
                for block in kind.blocks() {
                    collect_emits(block, flows, visited, out);
                }
            }
        }
        if let Some(handler) = &step.on_error {
            collect_emits(handler, flows, visited, out);
        }
    }
}

fn emitters(
    channels: &[Channel],
    flows: &BTreeMap<String, Block>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for channel in channels {
        let mut points = BTreeSet::new();
        collect_emits(&channel.steps, flows, &mut BTreeSet::new(), &mut points);
        for point in points {
            out.entry(point).or_default().insert(channel.name.clone());
        }
    }
    out
}
