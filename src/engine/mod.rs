//! Generation engine.
//!
//! - [`ModelRunner`]: prompt batch → generated tokens, one pass at a time
//! - [`TerminationPolicy`]: the only exit from the decode loop
//! - [`GenerationState`]: per-call state threaded through the steps

pub mod policy;
pub mod profiler;
pub mod runner;
pub mod state;
pub mod step;

pub use policy::{PassKind, StopReason, TerminationPolicy};
pub use runner::{GenerationOutput, ModelRunner};
pub use state::{GenerationState, TerminationCounters};
