//! Engine configuration, loaded from YAML.

use std::path::Path;
use std::time::Duration;

use ai_goap::{PlanDriverConfig, PlannerOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub planner: PlannerConfig,
}

/// Scheduler limits and defaults for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Consecutive passes without progress (and without a cycle or pending timer) before the
    /// execution fails with `stalled_execution`.
    pub max_stalled_passes: u32,

    /// Longest sleep between passes while only timers are pending.
    pub idle_backoff_ms: u64,

    /// Deadline for the whole execution, checked at every pass.
    pub overall_timeout_ms: Option<u64>,

    /// Maximum `call` nesting per channel.
    pub max_call_depth: usize,

    /// Await timeout for action types the registry has no timeout for.
    pub default_await_timeout_ms: u64,

    /// Record trace events into the execution report.
    pub record_trace: bool,

    /// Seed for the expression `random*` helpers; each channel derives its own stream.
    pub seed: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_stalled_passes: 3,
            idle_backoff_ms: 10,
            overall_timeout_ms: None,
            max_call_depth: 64,
            default_await_timeout_ms: 30_000,
            record_trace: true,
            seed: 0,
        }
    }
}

impl ExecutorConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn overall_timeout(&self) -> Option<Duration> {
        self.overall_timeout_ms.map(Duration::from_millis)
    }

    pub fn default_await_timeout(&self) -> Duration {
        Duration::from_millis(self.default_await_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_depth: usize,
    pub max_nodes_expanded: usize,
    pub min_replan_interval_ticks: u32,
    pub max_plan_starts_per_key: Option<u32>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let options = PlannerOptions::default();
        let driver = PlanDriverConfig::default();
        Self {
            max_depth: options.max_depth,
            max_nodes_expanded: options.max_nodes_expanded,
            min_replan_interval_ticks: driver.min_replan_interval_ticks,
            max_plan_starts_per_key: driver.max_plan_starts_per_key,
        }
    }
}

impl PlannerConfig {
    pub fn options(&self) -> PlannerOptions {
        PlannerOptions {
            max_depth: self.max_depth,
            max_nodes_expanded: self.max_nodes_expanded,
        }
    }

    pub fn driver(&self) -> PlanDriverConfig {
        PlanDriverConfig {
            min_replan_interval_ticks: self.min_replan_interval_ticks,
            max_plan_starts_per_key: self.max_plan_starts_per_key,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).context("Failed to parse engine config")
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
