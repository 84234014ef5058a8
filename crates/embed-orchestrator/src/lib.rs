//! # embed-orchestrator
//!
//! The resilient facade callers use for embedding generation.
//!
//! [`ResilientEmbedder`] combines cache lookup, circuit-breaker-guarded
//! provider calls, bounded retry, batch splitting with partial-failure
//! accounting, and immediate caching of purchased work. [`Dispatcher`]
//! decides per call whether generation runs inline or is handed to a
//! deferred work queue, guarded against duplicate in-flight work.

pub mod dispatch;
pub mod inflight;
pub mod orchestrator;
pub mod tokens;

pub use dispatch::{
    DeferredQueue, DispatchContext, Dispatched, DispatchedBatch, Dispatcher, QueueError,
};
pub use inflight::{InFlightClaim, InFlightSet};
pub use orchestrator::{ResilientEmbedder, SVC_BATCH, SVC_GENERATION};
pub use tokens::{split_batches, TokenEstimator};
