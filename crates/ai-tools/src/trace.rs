#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// A small trace event.
///
/// `pass` is the scheduler pass (or planner call) the event belongs to, `subject` names what it
/// is about (a channel, a sync point, an action id) and `detail` carries free-form context.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraceEvent {
    pub pass: u64,
    pub tag: Cow<'static, str>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub subject: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub detail: String,
}

impl TraceEvent {
    pub fn new(pass: u64, tag: impl Into<Cow<'static, str>>) -> Self {
        Self {
            pass,
            tag: tag.into(),
            subject: String::new(),
            detail: String::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>4}] {}", self.pass, self.tag)?;
        if !self.subject.is_empty() {
            write!(f, " {}", self.subject)?;
        }
        if !self.detail.is_empty() {
            write!(f, " ({})", self.detail)?;
        }
        Ok(())
    }
}

pub trait TraceSink: Send {
    fn emit(&mut self, event: TraceEvent);
}

#[derive(Debug, Default)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn emit(&mut self, _event: TraceEvent) {}
}

#[derive(Debug, Default)]
pub struct VecTraceSink {
    pub events: Vec<TraceEvent>,
}

impl TraceSink for VecTraceSink {
    fn emit(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraceLog {
    pub events: Vec<TraceEvent>,
}

impl TraceLog {
    pub fn push(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events carrying `tag`, in emission order.
    pub fn with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a TraceEvent> + 'a {
        self.events.iter().filter(move |e| e.tag == tag)
    }
}

/// Fan-out point owned by an executor or driver: an optional in-memory log plus an optional
/// streaming sink. Every event is also logged at `trace` level.
#[derive(Default)]
pub struct Tracer {
    log: Option<TraceLog>,
    sink: Option<Box<dyn TraceSink>>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("log", &self.log.as_ref().map(TraceLog::len))
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Tracer {
    /// Discards everything except the `tracing` mirror.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn recording() -> Self {
        Self {
            log: Some(TraceLog::default()),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn is_recording(&self) -> bool {
        self.log.is_some()
    }

    pub fn emit(&mut self, event: TraceEvent) {
        tracing::trace!(
            pass = event.pass,
            tag = %event.tag,
            subject = %event.subject,
            detail = %event.detail,
            "trace"
        );
        if let Some(log) = self.log.as_mut() {
            log.push(event.clone());
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.emit(event);
        }
    }

    pub fn log(&self) -> Option<&TraceLog> {
        self.log.as_ref()
    }

    /// Take the recorded log, leaving an empty one in its place.
    pub fn take_log(&mut self) -> TraceLog {
        match self.log.as_mut() {
            Some(log) => std::mem::take(log),
            None => TraceLog::default(),
        }
    }
}
