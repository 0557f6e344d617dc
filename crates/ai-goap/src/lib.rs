//! Goal-oriented action planning over immutable world-state snapshots.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod driver;
pub mod error;
pub mod model;
pub mod monitor;
pub mod planner;
pub mod predicate;
pub mod world;

pub use driver::{DriveStatus, PlanDriver, PlanDriverConfig, PlanKey, StepDispatcher, StepOutcome};
pub use error::{GoapError, Result};
pub use model::{admissibility_warnings, GoapAction, GoapGoal, GoapPlan, HeuristicWarning};
pub use monitor::{select_goal, PlanMonitor, PlanValidation, ReplanReason};
pub use planner::{plan, GoapPlanner, PlanOutcome, PlannerOptions};
pub use predicate::{CompareOp, Condition, Effect};
pub use world::{StateKey, WorldKind, WorldState, WorldValue};
