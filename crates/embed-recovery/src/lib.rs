//! # embed-recovery
//!
//! The healing layer: classifies degradation failures, executes bounded
//! recovery actions against external collaborators, and runs proactive
//! health checks.
//!
//! The recovery service holds no long-lived resources itself - every
//! action is an idempotent request to a collaborator (reopen a circuit,
//! clear the cache, ask the queue for a rebuild).

pub mod classify;
pub mod health;
pub mod recovery;

pub use classify::{classify, Classification, ImpactScope, NotificationLevel};
pub use health::{CheckResult, HealthChecker, HealthMonitor, HealthReport, HealthStatus};
pub use recovery::{
    recovery_id, GatewayHooks, NoopHooks, RecoveryError, RecoveryHooks, RecoveryService,
    RecoveryStrategy,
};
