//! Action-type to handler lookup.
//!
//! Control flow and variable mutation are executed directly by the executor and never reach the
//! registry; everything else (speech, camera, service calls, replanning) is a registered
//! [`ActionHandler`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ai_core::{CancellationToken, Value};
use serde::{Deserialize, Serialize};

use crate::error::{AbmlError, Result};

/// Action types the executor handles itself.
pub const BUILTIN_ACTIONS: [&str; 12] = [
    "set",
    "increment",
    "decrement",
    "cond",
    "for_each",
    "repeat",
    "goto",
    "call",
    "return",
    "branch",
    "emit",
    "wait_for",
];

pub fn is_builtin(action_type: &str) -> bool {
    BUILTIN_ACTIONS.contains(&action_type)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResultType {
    Completed,
    /// Accepted but still in progress; the executor polls awaited actions.
    Started,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub result_type: ActionResultType,
    /// The handler's result, or for `Started` an opaque ticket passed back to `poll`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ActionResult {
    pub fn completed() -> Self {
        Self {
            success: true,
            result_type: ActionResultType::Completed,
            return_value: None,
            error_message: None,
        }
    }

    pub fn started(ticket: impl Into<Value>) -> Self {
        Self {
            success: true,
            result_type: ActionResultType::Started,
            return_value: Some(ticket.into()),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result_type: ActionResultType::Failed,
            return_value: None,
            error_message: Some(message.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            success: true,
            result_type: ActionResultType::Skipped,
            return_value: None,
            error_message: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.return_value = Some(value.into());
        self
    }
}

/// Everything a handler gets to see about one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct ActionRequest<'a> {
    pub action_type: &'a str,
    /// Parameters with all `${...}` expressions already rendered.
    pub params: &'a Value,
    pub document_id: &'a str,
    pub channel: &'a str,
    pub location: &'a str,
    pub await_completion: bool,
    pub cancellation: &'a CancellationToken,
}

impl<'a> ActionRequest<'a> {
    pub fn param(&self, name: &str) -> Option<&'a Value> {
        self.params.member(name)
    }

    pub fn str_param(&self, name: &str) -> Option<&'a str> {
        self.param(name).and_then(Value::as_str)
    }
}

/// A pluggable domain action.
///
/// Handlers see each step at most once through `execute`. A handler that returns
/// [`ActionResultType::Started`] for an awaited dispatch is polled once per scheduler pass with the
/// ticket it returned until it resolves, fails, or the registry timeout cancels it.
pub trait ActionHandler: Send + Sync {
    fn execute(&self, request: &ActionRequest<'_>) -> ActionResult;

    fn poll(&self, _request: &ActionRequest<'_>, _ticket: &Value) -> ActionResult {
        ActionResult::failed("handler does not support awaited completion")
    }

    fn cancel(&self, _request: &ActionRequest<'_>, _ticket: &Value) {}
}

#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
    timeouts: BTreeMap<String, Duration>,
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("timeouts", &self.timeouts)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `log` handler installed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.handlers.insert("log".to_string(), Arc::new(LogHandler));
        registry
    }

    pub fn register(
        &mut self,
        action_type: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<()> {
        let action_type = action_type.into();
        if is_builtin(&action_type) {
            return Err(AbmlError::ReservedActionType { action_type });
        }
        if self.handlers.insert(action_type.clone(), handler).is_some() {
            tracing::debug!(%action_type, "replaced action handler");
        }
        Ok(())
    }

    /// Await timeout for one action type.
    pub fn with_timeout(mut self, action_type: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(action_type.into(), timeout);
        self
    }

    /// Await timeout for action types without their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn timeout_for(&self, action_type: &str) -> Option<Duration> {
        self.timeouts
            .get(action_type)
            .copied()
            .or(self.default_timeout)
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_type)
    }

    /// Registered types plus the executor built-ins; hand this to the compiler to reject
    /// unknown action types before execution.
    pub fn known_types(&self) -> BTreeSet<String> {
        BUILTIN_ACTIONS
            .iter()
            .map(|s| s.to_string())
            .chain(self.handlers.keys().cloned())
            .collect()
    }

    pub fn dispatch(&self, request: &ActionRequest<'_>) -> Result<ActionResult> {
        let handler = self
            .handlers
            .get(request.action_type)
            .ok_or_else(|| AbmlError::UnknownActionType {
                action_type: request.action_type.to_string(),
            })?;
        Ok(handler.execute(request))
    }
}

/// `log`: writes `message` through `tracing` at `level` (default `info`) and returns it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl ActionHandler for LogHandler {
    fn execute(&self, request: &ActionRequest<'_>) -> ActionResult {
        let message = match request.param("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => match request.params {
                Value::Map(_) | Value::Null => String::new(),
                other => other.to_string(),
            },
        };
        let level = request.str_param("level").unwrap_or("info");
        let channel = request.channel;
        match level {
            "trace" => tracing::trace!(target: "abml", %channel, "{message}"),
            "debug" => tracing::debug!(target: "abml", %channel, "{message}"),
            "warn" | "warning" => tracing::warn!(target: "abml", %channel, "{message}"),
            "error" => tracing::error!(target: "abml", %channel, "{message}"),
            _ => tracing::info!(target: "abml", %channel, "{message}"),
        }
        ActionResult::completed().with_value(message)
    }
}
