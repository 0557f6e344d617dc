//! ABML behavior documents: parsing, compilation, and a cooperative multi-channel executor.
//!
//! A document is compiled once into an immutable [`Document`] and can then be run any number of
//! times by an [`Executor`]. Channels are interleaved round-robin, one step per pass, and only
//! suspend at `wait_for` and at await-completion dispatches. Domain actions go through an
//! [`ActionRegistry`]; `trigger_replan` and [`FlowStepDispatcher`] connect documents to the
//! `ai-goap` planner.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod compiler;
pub mod config;
pub mod document;
pub mod error;
pub mod executor;
pub mod model;
pub mod planning;
pub mod registry;
pub mod waitgraph;

mod context;

pub use compiler::{Compiler, GoapCatalog};
pub use config::{EngineConfig, ExecutorConfig, PlannerConfig};
pub use document::{parse_duration, DocumentType, RawDocument};
pub use error::{AbmlError, Diagnostic, ExecutionError, Result};
pub use executor::{ChannelOutcome, ChannelStatus, ExecutionReport, ExecutionStatus, Executor};
pub use model::{
    AwaitMode, Block, Channel, CondBranch, Document, GoapAnnotation, Step, StepKind, WaitMode,
    WaitSpec,
};
pub use planning::{FlowStepDispatcher, PlanRequest, PlanResponse, ReplanHandler};
pub use registry::{
    ActionHandler, ActionRegistry, ActionRequest, ActionResult, ActionResultType, LogHandler,
    BUILTIN_ACTIONS,
};
pub use waitgraph::WaitGraph;
