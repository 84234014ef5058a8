//! Telemetry events emitted by the engine.
//!
//! The engine emits one event per provider round-trip and one per circuit
//! transition; aggregation and persistence are the consumer's concern.

use std::time::Duration;

/// Result of a provider round-trip, for accounting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    RateLimited,
    /// Rejected by an open circuit; no network attempt was made
    ShortCircuited,
}

/// One provider round-trip.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    /// Logical operation ("embedding_generation", "embedding_batch_generation")
    pub operation: &'static str,
    /// Number of texts in the request
    pub item_count: usize,
    /// Estimated tokens in the request
    pub token_estimate: usize,
    /// Estimated cost in USD for the request
    pub cost_estimate: f64,
    /// Wall-clock duration of the call
    pub duration: Duration,
    pub outcome: CallOutcome,
}

/// One circuit state transition.
#[derive(Debug, Clone)]
pub struct CircuitTransition {
    /// Circuit service name
    pub service: String,
    pub from: &'static str,
    pub to: &'static str,
}

/// Telemetry collaborator. Implementations must be cheap and non-blocking.
pub trait TelemetrySink: Send + Sync {
    fn provider_call(&self, event: ProviderCall);
    fn circuit_transition(&self, event: CircuitTransition);
}

/// Default sink: structured tracing lines.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn provider_call(&self, event: ProviderCall) {
        tracing::debug!(
            operation = event.operation,
            items = event.item_count,
            tokens = event.token_estimate,
            cost_usd = event.cost_estimate,
            duration_ms = event.duration.as_millis() as u64,
            outcome = ?event.outcome,
            "provider call"
        );
    }

    fn circuit_transition(&self, event: CircuitTransition) {
        tracing::info!(
            service = %event.service,
            from = event.from,
            to = event.to,
            "circuit transition"
        );
    }
}

/// No-op sink for tests and telemetry-less deployments.
#[derive(Debug, Default, Clone)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn provider_call(&self, _event: ProviderCall) {}
    fn circuit_transition(&self, _event: CircuitTransition) {}
}
