//! End-to-end recovery and health: classified healing actions against the
//! live stack and health reports over real collaborators.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::{MemoryQueue, TestHarness};
use embed_orchestrator::{DeferredQueue, SVC_GENERATION};
use embed_recovery::{
    classify, GatewayHooks, HealthChecker, HealthStatus, RecoveryService, RecoveryStrategy,
};
use embed_resilience::CircuitState;
use embed_types::{DegradationError, FailureKind, RecoverySettings};

/// A degraded vector capability classifies into fallback mode, and the
/// recovery run forces both circuits open so every caller takes the
/// degraded path immediately.
#[tokio::test]
async fn test_vector_outage_recovery_enters_fallback_mode() {
    let harness = TestHarness::new();
    harness
        .provider
        .fail_singles_remaining
        .store(1, Ordering::SeqCst);

    // One degraded generation, reported through the notifier
    assert!(harness.embedder.generate("probe").await.unwrap().is_none());
    let seen = harness.notifier.kinds.lock().unwrap().clone();
    assert!(seen.contains(&FailureKind::VectorUnavailable));

    let error = DegradationError::new(FailureKind::VectorUnavailable)
        .with_context("service", SVC_GENERATION);
    assert_eq!(
        classify(&error).strategy,
        RecoveryStrategy::EnterFallbackMode
    );

    let hooks = Arc::new(GatewayHooks::new(
        harness.breaker.clone(),
        harness.cache.clone(),
    ));
    let recovery = RecoveryService::new(hooks, RecoverySettings::default());
    assert!(recovery.attempt_recovery(&error).await.unwrap());

    assert_eq!(harness.breaker.state(SVC_GENERATION), CircuitState::Open);

    // Subsequent calls short-circuit without touching the provider
    let calls_before = harness.provider.single_calls.load(Ordering::SeqCst);
    assert!(harness
        .embedder
        .generate("while degraded")
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        harness.provider.single_calls.load(Ordering::SeqCst),
        calls_before
    );
}

/// Rate limiting recovers by opening the circuit named in the context.
#[tokio::test]
async fn test_rate_limit_recovery_opens_named_circuit() {
    let harness = TestHarness::new();
    let hooks = Arc::new(GatewayHooks::new(
        harness.breaker.clone(),
        harness.cache.clone(),
    ));
    let recovery = RecoveryService::new(hooks, RecoverySettings::default());

    let error = DegradationError::new(FailureKind::RateLimited)
        .with_context("service", SVC_GENERATION);
    assert!(recovery.attempt_recovery(&error).await.unwrap());
    assert_eq!(harness.breaker.state(SVC_GENERATION), CircuitState::Open);
}

/// Cache degradation recovers by clearing the cache, and generation keeps
/// working (uncached) throughout.
#[tokio::test]
async fn test_cache_recovery_clears_entries() {
    let harness = TestHarness::new();
    harness.embedder.generate("cached text").await.unwrap();
    assert_eq!(harness.cache.stats().entries, 1);

    let hooks = Arc::new(GatewayHooks::new(
        harness.breaker.clone(),
        harness.cache.clone(),
    ));
    let recovery = RecoveryService::new(hooks, RecoverySettings::default());

    let error = DegradationError::new(FailureKind::CacheDegraded);
    assert!(recovery.attempt_recovery(&error).await.unwrap());
    assert_eq!(harness.cache.stats().entries, 0);

    // Generation still works after the clear
    assert!(harness
        .embedder
        .generate("cached text")
        .await
        .unwrap()
        .is_some());
}

/// Healthy stack end to end: configured provider, working cache,
/// shallow queue.
#[tokio::test]
async fn test_health_report_healthy_stack() {
    let harness = TestHarness::new();
    let queue: Arc<dyn DeferredQueue> = Arc::new(MemoryQueue::default());

    let checker = HealthChecker::new(
        harness.provider.clone(),
        harness.cache.clone(),
        Some(queue),
        harness.embedder.in_flight().clone(),
        RecoverySettings {
            health_cache_secs: 0,
            ..Default::default()
        },
    );

    let report = checker.check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.recommendations.is_empty());

    // The probe entry never pollutes real cache contents
    assert_eq!(harness.cache.stats().entries, 0);
}

/// Deconfigured provider turns the aggregate report critical with a
/// concrete recommendation.
#[tokio::test]
async fn test_health_report_critical_without_provider() {
    let harness = TestHarness::new();
    harness.provider.configured.store(false, Ordering::SeqCst);

    let checker = HealthChecker::new(
        harness.provider.clone(),
        harness.cache.clone(),
        None,
        harness.embedder.in_flight().clone(),
        RecoverySettings {
            health_cache_secs: 0,
            ..Default::default()
        },
    );

    let report = checker.check().await;
    assert_eq!(report.status, HealthStatus::Critical);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("API key")));
}
