//! Compiled, immutable document representation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use ai_core::Value;
use ai_expr::Template;
use ai_goap::{Condition, Effect, GoapAction, GoapGoal};

use crate::document::DocumentType;

/// A shared, immutable action sequence.
pub type Block = Arc<[Step]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AwaitMode {
    /// Block the channel until the handler resolves.
    #[default]
    Completion,
    /// Continue as soon as the handler returns, even if it reports `Started`.
    FireAndForget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Single,
    /// Barrier: every point must have been emitted.
    AllOf,
    /// Race: the first emitted point wins.
    AnyOf,
}

#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub points: Vec<String>,
    pub mode: WaitMode,
    pub timeout: Option<Duration>,
    pub on_timeout: Option<Block>,
}

#[derive(Debug, Clone)]
pub struct CondBranch {
    pub when: Template,
    pub then: Block,
}

#[derive(Debug, Clone)]
pub enum StepKind {
    Set {
        variable: String,
        value: Template,
    },
    Increment {
        variable: String,
        amount: Template,
        decrement: bool,
    },
    Cond {
        branches: Vec<CondBranch>,
        otherwise: Option<Block>,
    },
    ForEach {
        variable: String,
        collection: Template,
        body: Block,
    },
    Repeat {
        times: Template,
        variable: Option<String>,
        body: Block,
    },
    /// Tail transfer to a flow on the same channel.
    Goto { flow: String },
    /// Run a flow and come back.
    Call { flow: String },
    Return,
    /// End this channel and start a dormant one.
    Branch { channel: String },
    Emit { point: String },
    WaitFor(WaitSpec),
    /// Dispatched through the action registry.
    Domain {
        action_type: String,
        params: Template,
    },
}

impl StepKind {
    pub fn type_name(&self) -> &str {
        match self {
            StepKind::Set { .. } => "set",
            StepKind::Increment {
                decrement: false, ..
            } => "increment",
            StepKind::Increment { decrement: true, .. } => "decrement",
            StepKind::Cond { .. } => "cond",
            StepKind::ForEach { .. } => "for_each",
            StepKind::Repeat { .. } => "repeat",
            StepKind::Goto { .. } => "goto",
            StepKind::Call { .. } => "call",
            StepKind::Return => "return",
            StepKind::Branch { .. } => "branch",
            StepKind::Emit { .. } => "emit",
            StepKind::WaitFor(_) => "wait_for",
            StepKind::Domain { action_type, .. } => action_type.as_str(),
        }
    }

    /// Nested sequences owned by this step (branch bodies, loop bodies, timeout fallbacks).
    pub fn blocks(&self) -> Vec<&Block> {
        match self {
            StepKind::Cond {
                branches,
                otherwise,
            } => branches
                .iter()
                .map(|b| &b.then)
                .chain(otherwise.iter())
                .collect(),
            StepKind::ForEach { body, .. } | StepKind::Repeat { body, .. } => vec![body],
            StepKind::WaitFor(spec) => spec.on_timeout.iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// GOAP metadata attached to an action.
#[derive(Debug, Clone, PartialEq)]
pub struct GoapAnnotation {
    pub preconditions: BTreeMap<String, Condition>,
    pub effects: BTreeMap<String, Effect>,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    /// Where the step was declared, e.g. `flows.start[2].then[0]`.
    pub location: String,
    pub on_error: Option<Block>,
    pub await_mode: AwaitMode,
    /// Variable receiving the handler's return value.
    pub result: Option<String>,
    pub goap: Option<GoapAnnotation>,
}

impl Step {
    pub fn new(kind: StepKind, location: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            on_error: None,
            await_mode: AwaitMode::default(),
            result: None,
            goap: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub steps: Block,
    /// `false` for channels that only start when branched to.
    pub auto_start: bool,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub document_type: DocumentType,
    pub variables: BTreeMap<String, Value>,
    /// Ordered by descending priority, then name.
    pub goals: Vec<GoapGoal>,
    pub flows: BTreeMap<String, Block>,
    pub channels: Vec<Channel>,
    pub error_handlers: BTreeMap<String, Block>,
    pub goap_actions: Vec<GoapAction>,
    pub(crate) goap_steps: BTreeMap<String, Step>,
    /// Sync point to the channels that may emit it (including through flows they run).
    pub(crate) emitters: BTreeMap<String, BTreeSet<String>>,
}

impl Document {
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn flow(&self, name: &str) -> Option<&Block> {
        self.flows.get(name)
    }

    /// The step a GOAP action id was extracted from.
    pub fn goap_step(&self, action_id: &str) -> Option<&Step> {
        self.goap_steps.get(action_id)
    }

    /// Channels that may emit `point`.
    pub fn emitters_of(&self, point: &str) -> impl Iterator<Item = &str> {
        self.emitters
            .get(point)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }
}
