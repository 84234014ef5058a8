//! # embed-resilience
//!
//! Resilience primitives for calls to external dependencies:
//! - [`CircuitBreaker`]: per-named-service state machine that short-circuits
//!   calls while a dependency is known-bad
//! - [`RetryPolicy`]: bounded exponential backoff with jitter
//!
//! Both are instance-owned (no process-wide statics), so independent
//! instances can coexist in tests without cross-contamination.

pub mod breaker;
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitState};
pub use retry::{retry, RetryPolicy};
