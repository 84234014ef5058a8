//! Failure taxonomy for the embedding engine.
//!
//! Every failure that crosses a component boundary is a [`DegradationError`]:
//! a typed value carrying kind, severity, retryability and the fallback
//! strategy the caller should follow. The mapping from kind to the other
//! fields is a closed table ([`FailureKind::classification`]) - adding a new
//! kind will not compile until it is classified.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::batch::BatchOutcome;

/// What went wrong, independent of how it surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection to the provider or the cache backend was lost
    ConnectionLost,
    /// Memory exhausted while processing a batch
    MemoryExhausted,
    /// Embedding capability is unavailable (provider down, retries exhausted)
    VectorUnavailable,
    /// Provider returned a rate-limit response
    RateLimited,
    /// Cache backend is degraded or unreachable
    CacheDegraded,
    /// Configuration is invalid (bad key, missing model, bad dimension)
    ConfigInvalid,
    /// Some batch items embedded, others failed
    PartialBatchFailure,
    /// A circuit breaker rejected the call without attempting it
    CircuitOpen,
    /// Provider call exceeded its timeout
    Timeout,
}

/// How bad it is for the overall system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What the caller should do instead of the failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Serve from cache where possible while reconnecting
    CacheThenReconnect,
    /// Retry with a smaller batch size
    ReduceBatchSize,
    /// Continue with keyword/non-semantic search
    NonSemanticSearch,
    /// Retry after the provider-specified or backoff delay
    DelayedRetry,
    /// Serve uncached rather than fail on the cache
    BypassCache,
    /// Disable the dependent feature until reconfigured
    DisableFeature,
    /// Proceed with the successful subset of a batch
    PartialResult,
}

impl FailureKind {
    /// The closed classification table: kind -> (severity, retryable, fallback).
    ///
    /// Exhaustive match on purpose - a new kind must be classified here
    /// before anything can construct an error with it.
    pub fn classification(self) -> (Severity, bool, FallbackStrategy) {
        match self {
            FailureKind::ConnectionLost => {
                (Severity::Critical, true, FallbackStrategy::CacheThenReconnect)
            }
            FailureKind::MemoryExhausted => {
                (Severity::High, false, FallbackStrategy::ReduceBatchSize)
            }
            FailureKind::VectorUnavailable => {
                (Severity::Medium, false, FallbackStrategy::NonSemanticSearch)
            }
            FailureKind::RateLimited => (Severity::Low, true, FallbackStrategy::DelayedRetry),
            FailureKind::CacheDegraded => (Severity::Low, false, FallbackStrategy::BypassCache),
            FailureKind::ConfigInvalid => {
                (Severity::Critical, false, FallbackStrategy::DisableFeature)
            }
            FailureKind::PartialBatchFailure => {
                (Severity::Medium, true, FallbackStrategy::PartialResult)
            }
            FailureKind::CircuitOpen => {
                (Severity::Medium, false, FallbackStrategy::NonSemanticSearch)
            }
            FailureKind::Timeout => (Severity::Medium, true, FallbackStrategy::DelayedRetry),
        }
    }

    /// Short machine-readable hint for the messaging layer.
    pub fn hint(self) -> &'static str {
        match self {
            FailureKind::ConnectionLost => "embedding-connection-lost",
            FailureKind::MemoryExhausted => "embedding-batch-memory",
            FailureKind::VectorUnavailable => "semantic-search-unavailable",
            FailureKind::RateLimited => "embedding-rate-limited",
            FailureKind::CacheDegraded => "embedding-cache-degraded",
            FailureKind::ConfigInvalid => "embedding-config-invalid",
            FailureKind::PartialBatchFailure => "embedding-batch-partial",
            FailureKind::CircuitOpen => "embedding-circuit-open",
            FailureKind::Timeout => "embedding-timeout",
        }
    }

    /// Stable snake_case name, used for recovery ids and logging.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ConnectionLost => "connection_lost",
            FailureKind::MemoryExhausted => "memory_exhausted",
            FailureKind::VectorUnavailable => "vector_unavailable",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::CacheDegraded => "cache_degraded",
            FailureKind::ConfigInvalid => "config_invalid",
            FailureKind::PartialBatchFailure => "partial_batch_failure",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed degradation failure.
///
/// Immutable once constructed; severity/retryable/fallback are derived from
/// the kind via [`FailureKind::classification`], never set independently.
#[derive(Debug)]
pub struct DegradationError {
    /// Failure kind (selects the rest of the classification)
    pub kind: FailureKind,
    /// Severity from the classification table
    pub severity: Severity,
    /// Whether a retry can reasonably succeed
    pub retryable: bool,
    /// What the caller should do instead
    pub fallback: FallbackStrategy,
    /// Short machine-readable hint for the messaging collaborator
    pub hint: &'static str,
    /// Free-form context (service name, batch size, collection id, ...)
    pub context: BTreeMap<String, String>,
    /// Per-position results when the kind is `PartialBatchFailure`
    pub outcome: Option<BatchOutcome>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DegradationError {
    /// Construct from a kind, deriving the classified fields.
    pub fn new(kind: FailureKind) -> Self {
        let (severity, retryable, fallback) = kind.classification();
        Self {
            kind,
            severity,
            retryable,
            fallback,
            hint: kind.hint(),
            context: BTreeMap::new(),
            outcome: None,
            source: None,
        }
    }

    /// Attach a context key/value pair.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach the batch outcome (partial failures carry both maps).
    pub fn with_outcome(mut self, outcome: BatchOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

impl fmt::Display for DegradationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "embedding degraded ({}): {}", self.kind, self.hint)?;
        if let Some(outcome) = &self.outcome {
            write!(
                f,
                " [{} ok, {} failed]",
                outcome.successful.len(),
                outcome.failed.len()
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for DegradationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Messaging collaborator: receives degradation events for rendering.
///
/// The engine never formats user-visible text beyond the hint; how (and
/// whether) the event reaches a user is the implementor's concern.
pub trait DegradationNotifier: Send + Sync {
    /// Report a degradation. Must not block or fail.
    fn notify(&self, error: &DegradationError);
}

/// Default notifier: a structured log line at a severity-mapped level.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl DegradationNotifier for LogNotifier {
    fn notify(&self, err: &DegradationError) {
        match err.severity {
            Severity::Critical | Severity::High => {
                error!(kind = %err.kind, hint = err.hint, context = ?err.context, "degradation")
            }
            Severity::Medium => {
                warn!(kind = %err.kind, hint = err.hint, context = ?err.context, "degradation")
            }
            Severity::Low => {
                debug!(kind = %err.kind, hint = err.hint, context = ?err.context, "degradation")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_table() {
        assert_eq!(
            FailureKind::ConnectionLost.classification(),
            (Severity::Critical, true, FallbackStrategy::CacheThenReconnect)
        );
        assert_eq!(
            FailureKind::MemoryExhausted.classification(),
            (Severity::High, false, FallbackStrategy::ReduceBatchSize)
        );
        assert_eq!(
            FailureKind::VectorUnavailable.classification(),
            (Severity::Medium, false, FallbackStrategy::NonSemanticSearch)
        );
        assert_eq!(
            FailureKind::RateLimited.classification(),
            (Severity::Low, true, FallbackStrategy::DelayedRetry)
        );
        assert_eq!(
            FailureKind::CacheDegraded.classification(),
            (Severity::Low, false, FallbackStrategy::BypassCache)
        );
        assert_eq!(
            FailureKind::ConfigInvalid.classification(),
            (Severity::Critical, false, FallbackStrategy::DisableFeature)
        );
        assert_eq!(
            FailureKind::PartialBatchFailure.classification(),
            (Severity::Medium, true, FallbackStrategy::PartialResult)
        );
    }

    #[test]
    fn test_error_derives_classification() {
        let err = DegradationError::new(FailureKind::RateLimited);
        assert_eq!(err.severity, Severity::Low);
        assert!(err.retryable);
        assert_eq!(err.fallback, FallbackStrategy::DelayedRetry);
        assert_eq!(err.hint, "embedding-rate-limited");
    }

    #[test]
    fn test_error_context_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = DegradationError::new(FailureKind::ConnectionLost)
            .with_context("service", "embedding_generation")
            .with_source(io);

        assert_eq!(
            err.context.get("service").map(String::as_str),
            Some("embedding_generation")
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_display_includes_outcome_counts() {
        let mut outcome = BatchOutcome::default();
        outcome.record_success(0, crate::Embedding::from_normalized(vec![1.0]));
        outcome.record_failure(1, "boom");

        let err = DegradationError::new(FailureKind::PartialBatchFailure).with_outcome(outcome);
        let text = err.to_string();
        assert!(text.contains("1 ok"));
        assert!(text.contains("1 failed"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
