//! Umbrella crate that re-exports the `ai-*` building blocks.
//!
//! - [`core`]: values, layered variable scopes, error codes, cancellation, clocks
//! - [`expr`]: the `${...}` expression language and its compile cache
//! - [`tools`]: replayable trace events
//! - [`goap`]: world state, A* planner, plan monitor and replanning driver
//! - [`abml`]: behavior document compiler and multi-channel executor

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

#[cfg(feature = "core")]
#[cfg_attr(docsrs, doc(cfg(feature = "core")))]
pub use ai_core as core;

#[cfg(feature = "expr")]
#[cfg_attr(docsrs, doc(cfg(feature = "expr")))]
pub use ai_expr as expr;

#[cfg(feature = "tools")]
#[cfg_attr(docsrs, doc(cfg(feature = "tools")))]
pub use ai_tools as tools;

#[cfg(feature = "goap")]
#[cfg_attr(docsrs, doc(cfg(feature = "goap")))]
pub use ai_goap as goap;

#[cfg(feature = "abml")]
#[cfg_attr(docsrs, doc(cfg(feature = "abml")))]
pub use ai_abml as abml;
