//! Tracing primitives for the behavior executor and planners.
//!
//! Events are plain data recorded during execution and rendered later by tooling (the CLI prints
//! them, tests assert on them). Structured logging goes through `tracing`; this crate is for the
//! replayable, per-pass record.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod trace;

pub use trace::{NullTraceSink, TraceEvent, TraceLog, TraceSink, Tracer, VecTraceSink};
