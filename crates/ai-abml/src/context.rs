//! Per-execution runtime state: channel frames, waits, pending awaited actions.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use ai_core::{Locals, Value};
use ai_expr::EvalEnv;

use crate::error::ExecutionError;
use crate::executor::ChannelStatus;
use crate::model::{Block, WaitMode};

#[derive(Debug, Clone)]
pub(crate) enum FrameKind {
    /// The channel's own steps. Exhausting it completes the channel.
    Root,
    /// A document `errors` handler that replaced the channel's work.
    ErrorHandler,
    Call,
    /// A `cond` branch or an `on_timeout` fallback.
    Block,
    /// An action-level `on_error` handler; drops the `error` binding when done.
    Recovery,
    ForEach {
        variable: String,
        items: Vec<Value>,
        next: usize,
    },
    Repeat {
        variable: Option<String>,
        times: u64,
        done: u64,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub steps: Block,
    pub index: usize,
    pub kind: FrameKind,
}

impl Frame {
    pub fn new(steps: Block, kind: FrameKind) -> Self {
        Self {
            steps,
            index: 0,
            kind,
        }
    }

    /// Frames a `goto` or `return` must not unwind past.
    pub fn is_boundary(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::Root | FrameKind::ErrorHandler | FrameKind::Call
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PendingWait {
    pub mode: WaitMode,
    pub points: Vec<String>,
    /// Points not yet emitted; only shrinks for barriers.
    pub outstanding: BTreeSet<String>,
    pub deadline: Option<Duration>,
    pub on_timeout: Option<Block>,
    pub location: String,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingAction {
    pub action_type: String,
    pub params: Value,
    pub ticket: Value,
    pub deadline: Duration,
    pub location: String,
    pub result: Option<String>,
    pub on_error: Option<Block>,
}

#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    pub name: String,
    pub status: ChannelStatus,
    pub frames: Vec<Frame>,
    pub locals: Locals,
    pub wait: Option<PendingWait>,
    pub action: Option<PendingAction>,
    pub steps_executed: u64,
    pub error: Option<ExecutionError>,
    pub in_error_handler: bool,
    pub env: EvalEnv,
}

impl ChannelState {
    pub fn new(name: impl Into<String>, steps: Block, auto_start: bool, env: EvalEnv) -> Self {
        let mut state = Self {
            name: name.into(),
            status: ChannelStatus::Dormant,
            env,
            ..Self::default()
        };
        if auto_start {
            state.start(steps);
        } else {
            state.frames.push(Frame::new(steps, FrameKind::Root));
        }
        state
    }

    pub fn start(&mut self, steps: Block) {
        self.frames = vec![Frame::new(steps, FrameKind::Root)];
        self.status = ChannelStatus::Running;
    }

    /// Number of nested `call` frames.
    pub fn call_depth(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| matches!(f.kind, FrameKind::Call))
            .count()
    }

    /// Pop the top frame, dropping any loop or error binding it introduced.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        match &frame.kind {
            FrameKind::ForEach { variable, .. } => {
                self.locals.remove(variable);
            }
            FrameKind::Repeat {
                variable: Some(variable),
                ..
            } => {
                self.locals.remove(variable);
            }
            FrameKind::Recovery => {
                self.locals.remove("error");
            }
            _ => {}
        }
        Some(frame)
    }

    pub fn finish(&mut self, status: ChannelStatus) {
        self.status = status;
        self.frames.clear();
        self.wait = None;
        self.action = None;
    }
}

/// Sync point to the channels (by index) currently blocked on it.
#[derive(Debug, Default)]
pub(crate) struct WaitRegistry {
    waiting: BTreeMap<String, BTreeSet<usize>>,
}

impl WaitRegistry {
    pub fn register<'p>(&mut self, channel: usize, points: impl IntoIterator<Item = &'p String>) {
        for point in points {
            self.waiting
                .entry(point.clone())
                .or_default()
                .insert(channel);
        }
    }

    /// Waiters of `point`; their registration for it is removed.
    pub fn take(&mut self, point: &str) -> BTreeSet<usize> {
        self.waiting.remove(point).unwrap_or_default()
    }

    /// Forget every registration of `channel`.
    pub fn remove_channel(&mut self, channel: usize) {
        self.waiting.retain(|_, waiters| {
            waiters.remove(&channel);
            !waiters.is_empty()
        });
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
