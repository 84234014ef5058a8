//! Failure classification for recovery decisions.

use embed_types::{DegradationError, FailureKind, Severity};

use crate::recovery::RecoveryStrategy;

/// How much of the system a failure affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactScope {
    /// The whole system is degraded (storage/provider connection gone)
    System,
    /// A single operation class is degraded (batches, timeouts)
    Operation,
    /// One feature is degraded (semantic search)
    Feature,
    /// Performance is degraded but results are correct
    Performance,
}

/// How loudly operators should hear about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Alert,
    Warning,
    Info,
    Silent,
}

/// Full classification for one failure.
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub severity: Severity,
    pub impact_scope: ImpactScope,
    pub strategy: RecoveryStrategy,
    pub notification_level: NotificationLevel,
    pub escalation_required: bool,
}

/// Classify a failure for recovery.
///
/// Fixed table keyed by kind; exhaustive so a new kind cannot slip
/// through unclassified.
pub fn classify(error: &DegradationError) -> Classification {
    match error.kind {
        FailureKind::ConnectionLost => Classification {
            severity: Severity::Critical,
            impact_scope: ImpactScope::System,
            strategy: RecoveryStrategy::Reconnect,
            notification_level: NotificationLevel::Alert,
            escalation_required: true,
        },
        FailureKind::MemoryExhausted => Classification {
            severity: Severity::High,
            impact_scope: ImpactScope::Operation,
            strategy: RecoveryStrategy::ReduceBatchSize,
            notification_level: NotificationLevel::Warning,
            escalation_required: false,
        },
        FailureKind::VectorUnavailable => Classification {
            severity: Severity::Medium,
            impact_scope: ImpactScope::Feature,
            strategy: RecoveryStrategy::EnterFallbackMode,
            notification_level: NotificationLevel::Warning,
            escalation_required: false,
        },
        FailureKind::RateLimited => Classification {
            severity: Severity::Low,
            impact_scope: ImpactScope::Performance,
            strategy: RecoveryStrategy::OpenCircuit,
            notification_level: NotificationLevel::Info,
            escalation_required: false,
        },
        FailureKind::CacheDegraded => Classification {
            severity: Severity::Low,
            impact_scope: ImpactScope::Performance,
            strategy: RecoveryStrategy::ClearCacheAndRetry,
            notification_level: NotificationLevel::Info,
            escalation_required: false,
        },
        FailureKind::ConfigInvalid => Classification {
            severity: Severity::Critical,
            impact_scope: ImpactScope::Feature,
            strategy: RecoveryStrategy::EnterFallbackMode,
            notification_level: NotificationLevel::Alert,
            escalation_required: true,
        },
        FailureKind::PartialBatchFailure => Classification {
            severity: Severity::Medium,
            impact_scope: ImpactScope::Operation,
            strategy: RecoveryStrategy::ReduceBatchSize,
            notification_level: NotificationLevel::Info,
            escalation_required: false,
        },
        FailureKind::CircuitOpen => Classification {
            severity: Severity::Medium,
            impact_scope: ImpactScope::Feature,
            strategy: RecoveryStrategy::EnterFallbackMode,
            notification_level: NotificationLevel::Info,
            escalation_required: false,
        },
        FailureKind::Timeout => Classification {
            severity: Severity::Medium,
            impact_scope: ImpactScope::Operation,
            strategy: RecoveryStrategy::ReduceBatchSize,
            notification_level: NotificationLevel::Info,
            escalation_required: false,
        },
    }
}
