//! Deterministic, engine-agnostic kernel primitives shared by the expression evaluator, the
//! behavior executor and the GOAP planner.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod cancel;
pub mod clock;
pub mod error;
pub mod rng;
pub mod scope;
pub mod value;

pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, ErrorCode};
pub use rng::{DeterministicRng, SplitMix64};
pub use scope::{
    Locals, MapProvider, ScopeChain, ScopeLayer, ScopeProvider, VariableLookup, VariableScope,
};
pub use value::Value;
