//! Cooperative round-robin channel executor.
//!
//! One pass advances every `Running` channel by exactly one step and polls every awaited action.
//! Channels only suspend at `wait_for` and at await-completion dispatches; everything else runs
//! to completion within the channel's turn. Cancellation and the overall deadline are checked at
//! pass and step boundaries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ai_core::rng::derive_seed;
use ai_core::{
    CancellationToken, Clock, ErrorCode, ScopeChain, SystemClock, Value, VariableScope,
};
use ai_expr::EvalEnv;
use ai_tools::{TraceEvent, TraceLog, Tracer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::context::{ChannelState, Frame, FrameKind, PendingAction, PendingWait, WaitRegistry};
use crate::error::{ExecutionError, StepError};
use crate::model::{AwaitMode, Block, Document, Step, StepKind, WaitMode};
use crate::registry::{ActionRegistry, ActionRequest, ActionResult, ActionResultType};
use crate::waitgraph::WaitGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// A branch target that has not been branched to.
    #[default]
    Dormant,
    Running,
    WaitingForSync,
    /// An awaited handler reported `Started` and is being polled.
    WaitingForAction,
    Complete,
    /// Ended by transferring control to another channel.
    Branched,
    Failed,
    Cancelled,
}

impl ChannelStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChannelStatus::Complete
                | ChannelStatus::Branched
                | ChannelStatus::Failed
                | ChannelStatus::Cancelled
        )
    }

    /// Started and not yet finished.
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != ChannelStatus::Dormant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Complete,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelOutcome {
    pub status: ChannelStatus,
    pub steps_executed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

/// Everything a caller learns about one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub document_id: String,
    pub status: ExecutionStatus,
    pub channels: BTreeMap<String, ChannelOutcome>,
    /// Every error raised, including ones an `on_error` block or `errors` handler took over.
    pub errors: Vec<ExecutionError>,
    pub passes: u64,
    /// Sync points in first-emission order.
    pub emitted: Vec<String>,
    /// Final document-scope variables.
    pub scope: BTreeMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: f64,
    #[serde(default)]
    pub trace: TraceLog,
}

impl ExecutionReport {
    pub fn is_complete(&self) -> bool {
        self.status == ExecutionStatus::Complete
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelOutcome> {
        self.channels.get(name)
    }

    /// Errors nobody handled.
    pub fn unhandled_errors(&self) -> impl Iterator<Item = &ExecutionError> {
        self.errors.iter().filter(|e| !e.handled)
    }

    pub fn first_error(&self, code: ErrorCode) -> Option<&ExecutionError> {
        self.errors.iter().find(|e| e.code == code)
    }
}

pub struct Executor {
    registry: Arc<ActionRegistry>,
    config: ExecutorConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl Executor {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            config: ExecutorConfig::default(),
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every auto-started channel of `document` to completion, cancellation or failure.
    pub fn run(
        &self,
        document: &Document,
        scope: VariableScope,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        self.run_with_tracer(document, scope, cancel, self.default_tracer())
    }

    pub fn run_with_tracer(
        &self,
        document: &Document,
        scope: VariableScope,
        cancel: &CancellationToken,
        tracer: Tracer,
    ) -> ExecutionReport {
        let channels = document
            .channels
            .iter()
            .enumerate()
            .map(|(i, c)| {
                ChannelState::new(c.name.clone(), c.steps.clone(), c.auto_start, self.env(i))
            })
            .collect();
        ExecutionContext::new(self, document, scope, cancel, channels, tracer).run()
    }

    /// Run `steps` as a single channel named `name` with access to `document`'s flows and error
    /// handlers.
    pub fn run_block(
        &self,
        document: &Document,
        name: &str,
        steps: Block,
        scope: VariableScope,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let channels = vec![ChannelState::new(name, steps, true, self.env(0))];
        ExecutionContext::new(self, document, scope, cancel, channels, self.default_tracer()).run()
    }

    fn default_tracer(&self) -> Tracer {
        if self.config.record_trace {
            Tracer::recording()
        } else {
            Tracer::disabled()
        }
    }

    fn env(&self, channel: usize) -> EvalEnv {
        EvalEnv::new(derive_seed(self.config.seed, channel as u64))
    }

    fn await_timeout(&self, action_type: &str) -> Duration {
        self.registry
            .timeout_for(action_type)
            .unwrap_or_else(|| self.config.default_await_timeout())
    }
}

/// What a channel's turn did to the scheduler's notion of progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Progress,
    Idle,
}

/// One document execution.
struct ExecutionContext<'e> {
    executor: &'e Executor,
    document: &'e Document,
    cancel: &'e CancellationToken,
    execution_id: Uuid,
    started_at: DateTime<Utc>,
    started: Duration,
    channels: Vec<ChannelState>,
    scope: VariableScope,
    emitted: BTreeSet<String>,
    emitted_order: Vec<String>,
    waits: WaitRegistry,
    errors: Vec<ExecutionError>,
    tracer: Tracer,
    pass: u64,
    fatal: Option<ErrorCode>,
}

impl<'e> ExecutionContext<'e> {
    fn new(
        executor: &'e Executor,
        document: &'e Document,
        mut scope: VariableScope,
        cancel: &'e CancellationToken,
        channels: Vec<ChannelState>,
        tracer: Tracer,
    ) -> Self {
        for (name, value) in &document.variables {
            scope.insert_default(name, value.clone());
        }
        Self {
            executor,
            document,
            cancel,
            execution_id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: executor.clock.now(),
            channels,
            scope,
            emitted: BTreeSet::new(),
            emitted_order: Vec::new(),
            waits: WaitRegistry::default(),
            errors: Vec::new(),
            tracer,
            pass: 0,
            fatal: None,
        }
    }

    fn now(&self) -> Duration {
        self.executor.clock.now()
    }

    fn trace(&mut self, tag: &'static str, subject: impl Into<String>, detail: impl Into<String>) {
        let event = TraceEvent::new(self.pass, tag)
            .with_subject(subject)
            .with_detail(detail);
        self.tracer.emit(event);
    }

    fn run(mut self) -> ExecutionReport {
        tracing::info!(
            document = %self.document.id,
            execution = %self.execution_id,
            channels = self.channels.len(),
            "execution started"
        );
        let mut stalled = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                self.abort(
                    ErrorCode::Cancelled,
                    "execution cancelled".to_string(),
                    ChannelStatus::Cancelled,
                );
                break;
            }
            if let Some(limit) = self.executor.config.overall_timeout() {
                let elapsed = self.now().saturating_sub(self.started);
                if elapsed >= limit {
                    self.abort(
                        ErrorCode::DeadlineExceeded,
                        format!("execution exceeded its {}ms deadline", limit.as_millis()),
                        ChannelStatus::Failed,
                    );
                    break;
                }
            }
            if !self.channels.iter().any(|c| c.status.is_active()) {
                break;
            }

            self.pass += 1;
            let mut progress = self.expire_waits();
            for index in 0..self.channels.len() {
                if self.cancel.is_cancelled() {
                    break;
                }
                let turn = match self.channels[index].status {
                    ChannelStatus::Running => self.advance(index),
                    ChannelStatus::WaitingForAction => self.poll_action(index),
                    _ => Turn::Idle,
                };
                progress |= turn == Turn::Progress;
            }

            if progress {
                stalled = 0;
                continue;
            }
            if self.cancel.is_cancelled() || !self.channels.iter().any(|c| c.status.is_active()) {
                continue;
            }

            if let Some(delay) = self.next_timer_delay() {
                self.executor.clock.sleep(delay);
                continue;
            }

            let all_waiting = self
                .channels
                .iter()
                .filter(|c| c.status.is_active())
                .all(|c| c.status == ChannelStatus::WaitingForSync);
            if all_waiting {
                if let Some(cycle) = self.find_deadlock() {
                    let path = cycle
                        .iter()
                        .chain(cycle.first())
                        .map(|c| format!("`{c}`"))
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    self.trace("abml.deadlock", cycle.join(","), path.clone());
                    self.abort(
                        ErrorCode::DeadlockDetected,
                        format!("deadlock: {path} wait on each other"),
                        ChannelStatus::Failed,
                    );
                    break;
                }
            }

            stalled += 1;
            tracing::debug!(pass = self.pass, stalled, "pass made no progress");
            if stalled >= self.executor.config.max_stalled_passes.max(1) {
                let waiting: Vec<String> = self
                    .channels
                    .iter()
                    .filter(|c| c.status.is_active())
                    .map(|c| c.name.clone())
                    .collect();
                self.trace("abml.stalled", waiting.join(","), "");
                self.abort(
                    ErrorCode::StalledExecution,
                    format!(
                        "no progress for {stalled} passes; blocked channels: {}",
                        waiting.join(", ")
                    ),
                    ChannelStatus::Failed,
                );
                break;
            }
        }

        self.into_report()
    }

    /// Delay until the next wait or action deadline, capped by the idle backoff.
    fn next_timer_delay(&self) -> Option<Duration> {
        let now = self.now();
        let next = self
            .channels
            .iter()
            .filter_map(|c| match c.status {
                ChannelStatus::WaitingForSync => c.wait.as_ref().and_then(|w| w.deadline),
                ChannelStatus::WaitingForAction => c.action.as_ref().map(|a| a.deadline),
                _ => None,
            })
            .min()?;
        Some(
            next.saturating_sub(now)
                .min(self.executor.config.idle_backoff()),
        )
    }

    /// Resolve timed-out waits, falling back to their `on_timeout` blocks.
    fn expire_waits(&mut self) -> bool {
        let now = self.now();
        let mut expired = false;
        for index in 0..self.channels.len() {
            let channel = &mut self.channels[index];
            if channel.status != ChannelStatus::WaitingForSync {
                continue;
            }
            let due = channel
                .wait
                .as_ref()
                .and_then(|w| w.deadline)
                .is_some_and(|deadline| now >= deadline);
            if !due {
                continue;
            }
            let Some(wait) = channel.wait.take() else {
                continue;
            };
            channel.status = ChannelStatus::Running;
            if let Some(fallback) = wait.on_timeout.clone() {
                channel.frames.push(Frame::new(fallback, FrameKind::Block));
            }
            let name = channel.name.clone();
            self.waits.remove_channel(index);
            tracing::debug!(channel = %name, points = ?wait.points, "wait timed out");
            self.trace("abml.wait.timeout", name, wait.points.join(","));
            expired = true;
        }
        expired
    }

    /// Channels blocked on each other, if any.
    ///
    /// A waiting channel depends on the waiting channels that may emit one of its outstanding
    /// points. A point no channel of the document emits can only be satisfied by another waiter,
    /// so it links to all of them. A point whose emitters are all past waiting (finished, failed,
    /// dormant) adds no edge and is left to the stall counter.
    fn find_deadlock(&self) -> Option<Vec<String>> {
        let waiting: BTreeSet<&str> = self
            .channels
            .iter()
            .filter(|c| c.status == ChannelStatus::WaitingForSync)
            .map(|c| c.name.as_str())
            .collect();

        let mut graph = WaitGraph::new();
        for channel in &self.channels {
            if channel.status != ChannelStatus::WaitingForSync {
                continue;
            }
            let Some(wait) = &channel.wait else { continue };
            graph.add_node(channel.name.as_str());
            for point in &wait.outstanding {
                let emitters: Vec<&str> = self.document.emitters_of(point).collect();
                if emitters.is_empty() {
                    for other in waiting.iter().filter(|o| **o != channel.name) {
                        graph.add_edge(channel.name.as_str(), *other);
                    }
                    continue;
                }
                for producer in emitters.into_iter().filter(|p| waiting.contains(p)) {
                    graph.add_edge(channel.name.as_str(), producer);
                }
            }
        }
        graph.find_cycle()
    }

    /// End the execution: every active channel takes `status` and the error is recorded once.
    fn abort(&mut self, code: ErrorCode, message: String, status: ChannelStatus) {
        tracing::warn!(document = %self.document.id, %code, %message, "execution aborted");
        self.fatal = Some(code);
        self.errors
            .push(ExecutionError::new(code, message.clone(), self.document.id.clone()));

        for index in 0..self.channels.len() {
            if !self.channels[index].status.is_active() {
                continue;
            }
            if let Some(action) = self.channels[index].action.take() {
                self.cancel_action(index, &action);
            }
            let channel = &mut self.channels[index];
            if status == ChannelStatus::Failed {
                channel.error = Some(
                    ExecutionError::new(code, message.clone(), self.document.id.clone())
                        .with_channel(channel.name.clone()),
                );
            }
            channel.finish(status);
        }
        self.waits = WaitRegistry::default();
    }

    fn cancel_action(&self, index: usize, action: &PendingAction) {
        let Some(handler) = self.executor.registry.get(&action.action_type) else {
            return;
        };
        let request = ActionRequest {
            action_type: &action.action_type,
            params: &action.params,
            document_id: &self.document.id,
            channel: &self.channels[index].name,
            location: &action.location,
            await_completion: true,
            cancellation: self.cancel,
        };
        handler.cancel(&request, &action.ticket);
    }

    fn into_report(self) -> ExecutionReport {
        let status = if self.fatal == Some(ErrorCode::Cancelled) {
            ExecutionStatus::Cancelled
        } else if self.fatal.is_some()
            || self
                .channels
                .iter()
                .any(|c| c.status == ChannelStatus::Failed)
        {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Complete
        };

        let elapsed = self.now().saturating_sub(self.started);
        let mut tracer = self.tracer;
        let channels = self
            .channels
            .into_iter()
            .map(|c| {
                (
                    c.name,
                    ChannelOutcome {
                        status: c.status,
                        steps_executed: c.steps_executed,
                        error: c.error,
                    },
                )
            })
            .collect();

        tracing::info!(
            document = %self.document.id,
            execution = %self.execution_id,
            ?status,
            passes = self.pass,
            errors = self.errors.len(),
            "execution finished"
        );

        ExecutionReport {
            execution_id: self.execution_id,
            document_id: self.document.id.clone(),
            status,
            channels,
            errors: self.errors,
            passes: self.pass,
            emitted: self.emitted_order,
            scope: self.scope.into_document(),
            started_at: self.started_at,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            trace: tracer.take_log(),
        }
    }

    /// Run one step of a `Running` channel.
    fn advance(&mut self, index: usize) -> Turn {
        let mut channel = std::mem::take(&mut self.channels[index]);
        self.step(index, &mut channel);
        self.channels[index] = channel;
        Turn::Progress
    }

    fn step(&mut self, index: usize, channel: &mut ChannelState) {
        let (block, position) = loop {
            let Some(frame) = channel.frames.last_mut() else {
                self.complete(channel);
                return;
            };
            if frame.index < frame.steps.len() {
                let position = frame.index;
                frame.index += 1;
                break (frame.steps.clone(), position);
            }
            Self::finish_frame(channel);
        };
        let step = &block[position];
        channel.steps_executed += 1;
        tracing::debug!(
            channel = %channel.name,
            step = %step.location,
            action = step.kind.type_name(),
            "step"
        );

        if let Err(err) = self.execute(index, channel, step) {
            self.handle_error(channel, err, &step.location, step.on_error.as_ref());
        }
    }

    fn complete(&mut self, channel: &mut ChannelState) {
        channel.finish(ChannelStatus::Complete);
        tracing::debug!(channel = %channel.name, "channel complete");
        self.trace("abml.channel.complete", channel.name.clone(), "");
    }

    /// Handle an exhausted top frame: loop again or pop it.
    fn finish_frame(channel: &mut ChannelState) {
        let rebind = match channel.frames.last_mut() {
            Some(Frame {
                kind:
                    FrameKind::ForEach {
                        variable,
                        items,
                        next,
                    },
                index,
                ..
            }) if *next < items.len() => {
                let item = items[*next].clone();
                *next += 1;
                *index = 0;
                Some((variable.clone(), item))
            }
            Some(Frame {
                kind:
                    FrameKind::Repeat {
                        variable,
                        times,
                        done,
                    },
                index,
                ..
            }) if *done + 1 < *times => {
                *done += 1;
                *index = 0;
                variable
                    .clone()
                    .map(|variable| (variable, Value::Number(*done as f64)))
            }
            _ => {
                channel.pop_frame();
                None
            }
        };
        if let Some((variable, value)) = rebind {
            channel.locals.insert(variable, value);
        }
    }

    fn execute(
        &mut self,
        index: usize,
        channel: &mut ChannelState,
        step: &Step,
    ) -> Result<(), StepError> {
        match &step.kind {
            StepKind::Set { variable, value } => {
                let mut scope = ScopeChain::new(&mut channel.locals, &mut self.scope);
                let value = value.render(&scope, &mut channel.env)?;
                scope.set(variable, value)?;
            }
            StepKind::Increment {
                variable,
                amount,
                decrement,
            } => {
                let mut scope = ScopeChain::new(&mut channel.locals, &mut self.scope);
                let amount = amount.render(&scope, &mut channel.env)?;
                let Some(amount) = amount.as_f64() else {
                    return Err(StepError::new(
                        ErrorCode::TypeMismatch,
                        format!("increment amount must be a number, found {}", amount.type_name()),
                    ));
                };
                let delta = if *decrement { -amount } else { amount };
                scope.increment(variable, delta)?;
            }
            StepKind::Cond {
                branches,
                otherwise,
            } => {
                let scope = ScopeChain::new(&mut channel.locals, &mut self.scope);
                let mut chosen = None;
                for branch in branches {
                    if branch.when.render(&scope, &mut channel.env)?.is_truthy() {
                        chosen = Some(branch.then.clone());
                        break;
                    }
                }
                if let Some(block) = chosen.or_else(|| otherwise.clone()) {
                    channel.frames.push(Frame::new(block, FrameKind::Block));
                }
            }
            StepKind::ForEach {
                variable,
                collection,
                body,
            } => {
                let scope = ScopeChain::new(&mut channel.locals, &mut self.scope);
                let items = match collection.render(&scope, &mut channel.env)? {
                    Value::List(items) => items,
                    Value::Map(entries) => entries
                        .into_iter()
                        .map(|(key, value)| Value::map().with("key", key).with("value", value))
                        .collect(),
                    Value::Null => Vec::new(),
                    other => {
                        return Err(StepError::new(
                            ErrorCode::TypeMismatch,
                            format!("for_each needs a list, found {}", other.type_name()),
                        ))
                    }
                };
                if let Some(first) = items.first().cloned() {
                    channel.locals.insert(variable.clone(), first);
                    channel.frames.push(Frame::new(
                        body.clone(),
                        FrameKind::ForEach {
                            variable: variable.clone(),
                            items,
                            next: 1,
                        },
                    ));
                }
            }
            StepKind::Repeat {
                times,
                variable,
                body,
            } => {
                let scope = ScopeChain::new(&mut channel.locals, &mut self.scope);
                let rendered = times.render(&scope, &mut channel.env)?;
                let times = match rendered.as_f64() {
                    Some(n) if n.is_finite() && n >= 0.0 => n.floor() as u64,
                    _ => {
                        return Err(StepError::new(
                            ErrorCode::TypeMismatch,
                            format!("repeat count must be a non-negative number, found `{rendered}`"),
                        ))
                    }
                };
                if times > 0 {
                    if let Some(variable) = variable {
                        channel.locals.insert(variable.clone(), Value::Number(0.0));
                    }
                    channel.frames.push(Frame::new(
                        body.clone(),
                        FrameKind::Repeat {
                            variable: variable.clone(),
                            times,
                            done: 0,
                        },
                    ));
                }
            }
            StepKind::Goto { flow } => {
                let target = self.flow(flow)?;
                while channel.frames.last().is_some_and(|f| !f.is_boundary()) {
                    channel.pop_frame();
                }
                if let Some(frame) = channel.frames.last_mut() {
                    frame.steps = target;
                    frame.index = 0;
                }
                self.trace("abml.goto", channel.name.clone(), flow.clone());
            }
            StepKind::Call { flow } => {
                let target = self.flow(flow)?;
                let max = self.executor.config.max_call_depth;
                if channel.call_depth() >= max {
                    return Err(StepError::new(
                        ErrorCode::CallDepthExceeded,
                        format!("call to `{flow}` exceeds the maximum call depth of {max}"),
                    ));
                }
                channel.frames.push(Frame::new(target, FrameKind::Call));
            }
            StepKind::Return => {
                while let Some(frame) = channel.pop_frame() {
                    if matches!(frame.kind, FrameKind::Call) {
                        break;
                    }
                }
                if channel.frames.is_empty() {
                    self.complete(channel);
                }
            }
            StepKind::Branch { channel: target } => {
                channel.finish(ChannelStatus::Branched);
                self.trace("abml.branch", channel.name.clone(), target.clone());
                self.start_channel(target, &channel.name);
            }
            StepKind::Emit { point } => {
                self.emit(point, &channel.name);
            }
            StepKind::WaitFor(spec) => {
                let outstanding: BTreeSet<String> = spec
                    .points
                    .iter()
                    .filter(|p| !self.emitted.contains(p.as_str()))
                    .cloned()
                    .collect();
                let satisfied = match spec.mode {
                    WaitMode::AllOf => outstanding.is_empty(),
                    WaitMode::Single | WaitMode::AnyOf => outstanding.len() < spec.points.len(),
                };
                if satisfied {
                    return Ok(());
                }
                self.waits.register(index, &outstanding);
                channel.status = ChannelStatus::WaitingForSync;
                channel.wait = Some(PendingWait {
                    mode: spec.mode,
                    points: spec.points.clone(),
                    outstanding,
                    deadline: spec.timeout.map(|t| self.now() + t),
                    on_timeout: spec.on_timeout.clone(),
                    location: step.location.clone(),
                });
                tracing::debug!(channel = %channel.name, points = ?spec.points, "waiting");
                self.trace("abml.wait", channel.name.clone(), spec.points.join(","));
            }
            StepKind::Domain {
                action_type,
                params,
            } => {
                let scope = ScopeChain::new(&mut channel.locals, &mut self.scope);
                let params = params.render(&scope, &mut channel.env)?;
                let await_completion = step.await_mode == AwaitMode::Completion;
                let request = ActionRequest {
                    action_type,
                    params: &params,
                    document_id: &self.document.id,
                    channel: &channel.name,
                    location: &step.location,
                    await_completion,
                    cancellation: self.cancel,
                };
                let result = self
                    .executor
                    .registry
                    .dispatch(&request)
                    .map_err(|err| StepError::new(err.code(), err.to_string()))?;
                self.trace("abml.action", channel.name.clone(), action_type.clone());

                match result.result_type {
                    ActionResultType::Started if await_completion => {
                        let ticket = result.return_value.unwrap_or_default();
                        channel.status = ChannelStatus::WaitingForAction;
                        channel.action = Some(PendingAction {
                            action_type: action_type.clone(),
                            params,
                            ticket,
                            deadline: self.now() + self.executor.await_timeout(action_type),
                            location: step.location.clone(),
                            result: step.result.clone(),
                            on_error: step.on_error.clone(),
                        });
                    }
                    _ => self.apply_result(channel, result, step.result.as_deref())?,
                }
            }
        }
        Ok(())
    }

    /// Bind a resolved handler result, or turn a failure into a step error.
    fn apply_result(
        &mut self,
        channel: &mut ChannelState,
        result: ActionResult,
        bind: Option<&str>,
    ) -> Result<(), StepError> {
        match result.result_type {
            ActionResultType::Failed => Err(StepError::new(
                ErrorCode::ActionHandlerFailure,
                result
                    .error_message
                    .unwrap_or_else(|| "action handler failed".to_string()),
            )),
            ActionResultType::Completed | ActionResultType::Started | ActionResultType::Skipped => {
                if let (Some(variable), Some(value)) = (bind, result.return_value) {
                    ScopeChain::new(&mut channel.locals, &mut self.scope).set(variable, value)?;
                }
                Ok(())
            }
        }
    }

    /// Poll an awaited action; time it out once its deadline passes.
    fn poll_action(&mut self, index: usize) -> Turn {
        let mut channel = std::mem::take(&mut self.channels[index]);
        let turn = self.poll_channel_action(&mut channel);
        self.channels[index] = channel;
        turn
    }

    fn poll_channel_action(&mut self, channel: &mut ChannelState) -> Turn {
        let Some(pending) = channel.action.take() else {
            channel.status = ChannelStatus::Running;
            return Turn::Progress;
        };
        let Some(handler) = self.executor.registry.get(&pending.action_type).cloned() else {
            channel.status = ChannelStatus::Running;
            self.handle_error(
                channel,
                StepError::new(
                    ErrorCode::UnknownActionType,
                    format!("unknown action type `{}`", pending.action_type),
                ),
                &pending.location,
                pending.on_error.as_ref(),
            );
            return Turn::Progress;
        };
        let request = ActionRequest {
            action_type: &pending.action_type,
            params: &pending.params,
            document_id: &self.document.id,
            channel: &channel.name,
            location: &pending.location,
            await_completion: true,
            cancellation: self.cancel,
        };

        if self.now() >= pending.deadline {
            handler.cancel(&request, &pending.ticket);
            channel.status = ChannelStatus::Running;
            let timeout = self.executor.await_timeout(&pending.action_type);
            self.trace(
                "abml.action.timeout",
                channel.name.clone(),
                pending.action_type.clone(),
            );
            self.handle_error(
                channel,
                StepError::new(
                    ErrorCode::ActionHandlerFailure,
                    format!(
                        "`{}` timed out after {}ms",
                        pending.action_type,
                        timeout.as_millis()
                    ),
                ),
                &pending.location,
                pending.on_error.as_ref(),
            );
            return Turn::Progress;
        }

        let result = handler.poll(&request, &pending.ticket);
        if result.result_type == ActionResultType::Started {
            channel.action = Some(pending);
            return Turn::Idle;
        }

        channel.status = ChannelStatus::Running;
        self.trace(
            "abml.action.resolved",
            channel.name.clone(),
            pending.action_type.clone(),
        );
        if let Err(err) = self.apply_result(channel, result, pending.result.as_deref()) {
            self.handle_error(channel, err, &pending.location, pending.on_error.as_ref());
        }
        Turn::Progress
    }

    fn flow(&self, name: &str) -> Result<Block, StepError> {
        self.document.flow(name).cloned().ok_or_else(|| {
            StepError::new(ErrorCode::CompileError, format!("unknown flow `{name}`"))
        })
    }

    fn start_channel(&mut self, name: &str, from: &str) {
        if name == from {
            tracing::warn!(channel = %name, "branch to the running channel ignored");
            return;
        }
        let Some(channel) = self.channels.iter_mut().find(|c| c.name == name) else {
            tracing::warn!(target_channel = %name, from = %from, "branch to unknown channel");
            return;
        };
        if channel.status != ChannelStatus::Dormant {
            tracing::warn!(
                target_channel = %name,
                from = %from,
                status = ?channel.status,
                "branch target already started"
            );
            return;
        }
        let steps = channel
            .frames
            .first()
            .map(|f| f.steps.clone())
            .or_else(|| self.document.channel(name).map(|c| c.steps.clone()));
        if let Some(steps) = steps {
            channel.start(steps);
        }
    }

    fn emit(&mut self, point: &str, by: &str) {
        if self.emitted.insert(point.to_string()) {
            self.emitted_order.push(point.to_string());
        }
        tracing::debug!(%point, channel = %by, "emit");
        self.trace("abml.emit", point.to_string(), by.to_string());

        for waiter in self.waits.take(point) {
            let channel = &mut self.channels[waiter];
            let Some(wait) = channel.wait.as_mut() else {
                continue;
            };
            wait.outstanding.remove(point);
            let wake = match wait.mode {
                WaitMode::AllOf => wait.outstanding.is_empty(),
                WaitMode::Single | WaitMode::AnyOf => true,
            };
            if !wake {
                continue;
            }
            channel.wait = None;
            channel.status = ChannelStatus::Running;
            let name = channel.name.clone();
            self.waits.remove_channel(waiter);
            tracing::debug!(channel = %name, %point, "woken");
            self.trace("abml.wake", name, point.to_string());
        }
    }

    /// Route a step failure: `on_error`, then the document `errors` table, then channel failure.
    fn handle_error(
        &mut self,
        channel: &mut ChannelState,
        err: StepError,
        location: &str,
        on_error: Option<&Block>,
    ) {
        let mut error = ExecutionError::new(err.code, err.message, self.document.id.clone())
            .with_channel(channel.name.clone())
            .with_action(location);

        if let Some(handler) = on_error.filter(|_| err.code.is_action_recoverable()) {
            error.handled = true;
            tracing::warn!(%error, "action error recovered by on_error");
            self.trace("abml.error.recovered", channel.name.clone(), err.code.as_str());
            channel.locals.insert("error".to_string(), error.to_value());
            channel.frames.push(Frame::new(handler.clone(), FrameKind::Recovery));
            self.errors.push(error);
            return;
        }

        let table_handler = if channel.in_error_handler {
            None
        } else {
            self.document
                .error_handlers
                .get(err.code.as_str())
                .or_else(|| self.document.error_handlers.get("default"))
                .cloned()
        };
        if let Some(handler) = table_handler {
            error.handled = true;
            tracing::warn!(%error, "error handled by document errors table");
            self.trace("abml.error.handler", channel.name.clone(), err.code.as_str());
            channel.frames = vec![Frame::new(handler, FrameKind::ErrorHandler)];
            channel.in_error_handler = true;
            channel.wait = None;
            channel.action = None;
            channel.status = ChannelStatus::Running;
            channel.locals.insert("error".to_string(), error.to_value());
            self.errors.push(error);
            return;
        }

        tracing::warn!(%error, "channel failed");
        self.trace("abml.channel.failed", channel.name.clone(), err.code.as_str());
        channel.finish(ChannelStatus::Failed);
        channel.error = Some(error.clone());
        self.errors.push(error);
    }
}
