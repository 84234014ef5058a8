//! Bounded recovery execution.
//!
//! A recovery attempt is identified by hash(failure kind, context); a
//! sliding one-hour window bounds attempts per id so a persistent failure
//! cannot drive an infinite heal loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use embed_cache::EmbeddingCache;
use embed_orchestrator::{SVC_BATCH, SVC_GENERATION};
use embed_resilience::CircuitBreaker;
use embed_types::{DegradationError, FailureKind, RecoverySettings};

use crate::classify::classify;

/// Available recovery actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Reconnect,
    RebuildIndex,
    ClearCacheAndRetry,
    ReduceBatchSize,
    RestartExternalService,
    RotateCredentials,
    OpenCircuit,
    ScaleResources,
    EnterFallbackMode,
    EmergencyMaintenance,
}

/// Recovery execution error.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Recovery hook failed: {0}")]
    Hook(String),
}

/// Side-effect surface for recovery actions.
///
/// Every action is a request to an external collaborator; defaults are
/// logged no-ops so a host only wires the hooks it supports. All hooks
/// must be idempotent.
#[async_trait]
pub trait RecoveryHooks: Send + Sync {
    async fn reconnect(&self) -> Result<(), RecoveryError> {
        debug!("No reconnect hook wired");
        Ok(())
    }

    async fn request_index_rebuild(&self) -> Result<(), RecoveryError> {
        debug!("No index rebuild hook wired");
        Ok(())
    }

    async fn clear_cache(&self) -> Result<(), RecoveryError> {
        debug!("No cache clear hook wired");
        Ok(())
    }

    async fn reduce_batch_size(&self) -> Result<(), RecoveryError> {
        debug!("No batch size hook wired");
        Ok(())
    }

    async fn restart_external_service(&self) -> Result<(), RecoveryError> {
        debug!("No service restart hook wired");
        Ok(())
    }

    async fn rotate_credentials(&self) -> Result<(), RecoveryError> {
        debug!("No credential rotation hook wired");
        Ok(())
    }

    async fn open_circuit(&self, service: &str) -> Result<(), RecoveryError> {
        debug!(service = service, "No circuit hook wired");
        Ok(())
    }

    async fn scale_resources(&self) -> Result<(), RecoveryError> {
        debug!("No scaling hook wired");
        Ok(())
    }

    async fn enter_fallback_mode(&self) -> Result<(), RecoveryError> {
        debug!("No fallback mode hook wired");
        Ok(())
    }

    async fn emergency_maintenance(&self) -> Result<(), RecoveryError> {
        debug!("No maintenance hook wired");
        Ok(())
    }
}

/// All-default hooks for tests and minimal deployments.
#[derive(Debug, Default)]
pub struct NoopHooks;

#[async_trait]
impl RecoveryHooks for NoopHooks {}

/// Hooks wired to the gateway's own collaborators: the circuit breaker
/// registry and the embedding cache.
pub struct GatewayHooks {
    breaker: Arc<CircuitBreaker>,
    cache: Arc<EmbeddingCache>,
}

impl GatewayHooks {
    pub fn new(breaker: Arc<CircuitBreaker>, cache: Arc<EmbeddingCache>) -> Self {
        Self { breaker, cache }
    }
}

#[async_trait]
impl RecoveryHooks for GatewayHooks {
    async fn clear_cache(&self) -> Result<(), RecoveryError> {
        let removed = self.cache.clear();
        info!(removed = removed, "Recovery cleared the embedding cache");
        Ok(())
    }

    async fn open_circuit(&self, service: &str) -> Result<(), RecoveryError> {
        self.breaker.force_open(service);
        info!(service = service, "Recovery forced circuit open");
        Ok(())
    }

    async fn enter_fallback_mode(&self) -> Result<(), RecoveryError> {
        // Opening both circuits routes every caller to the degraded path
        // until the cool-down probes find the provider healthy again.
        self.breaker.force_open(SVC_GENERATION);
        self.breaker.force_open(SVC_BATCH);
        info!("Recovery entered fallback mode");
        Ok(())
    }
}

/// Stable id for one (failure kind, context) pair.
pub fn recovery_id(kind: FailureKind, context: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    for (key, value) in context {
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        hasher.update([1u8]);
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Executes classified recovery actions with a bounded attempt budget.
pub struct RecoveryService {
    hooks: Arc<dyn RecoveryHooks>,
    config: RecoverySettings,
    attempts: DashMap<String, Vec<Instant>>,
}

impl RecoveryService {
    pub fn new(hooks: Arc<dyn RecoveryHooks>, config: RecoverySettings) -> Self {
        Self {
            hooks,
            config,
            attempts: DashMap::new(),
        }
    }

    /// Attempt to heal a failure.
    ///
    /// Returns Ok(true) when a recovery action ran, Ok(false) when the
    /// attempt budget for this failure is exhausted.
    pub async fn attempt_recovery(
        &self,
        error: &DegradationError,
    ) -> Result<bool, RecoveryError> {
        let classification = classify(error);
        let id = recovery_id(error.kind, &error.context);

        if !self.try_claim_attempt(&id) {
            warn!(
                kind = %error.kind,
                max_per_hour = self.config.max_attempts_per_hour,
                "Recovery attempt budget exhausted, skipping"
            );
            return Ok(false);
        }

        info!(
            kind = %error.kind,
            strategy = ?classification.strategy,
            "Executing recovery"
        );
        self.execute(classification.strategy, error).await?;
        Ok(true)
    }

    /// Claim an attempt slot in the rolling window, pruning stale entries.
    fn try_claim_attempt(&self, id: &str) -> bool {
        let mut slot = self.attempts.entry(id.to_string()).or_default();
        // checked_sub: early in process life "an hour ago" may not exist yet
        let cutoff = Instant::now().checked_sub(Duration::from_secs(3600));
        slot.retain(|at| cutoff.is_none_or(|c| *at > c));

        if slot.len() >= self.config.max_attempts_per_hour {
            return false;
        }
        slot.push(Instant::now());
        true
    }

    async fn execute(
        &self,
        strategy: RecoveryStrategy,
        error: &DegradationError,
    ) -> Result<(), RecoveryError> {
        match strategy {
            RecoveryStrategy::Reconnect => self.hooks.reconnect().await,
            RecoveryStrategy::RebuildIndex => self.hooks.request_index_rebuild().await,
            RecoveryStrategy::ClearCacheAndRetry => self.hooks.clear_cache().await,
            RecoveryStrategy::ReduceBatchSize => self.hooks.reduce_batch_size().await,
            RecoveryStrategy::RestartExternalService => {
                self.hooks.restart_external_service().await
            }
            RecoveryStrategy::RotateCredentials => self.hooks.rotate_credentials().await,
            RecoveryStrategy::OpenCircuit => {
                let service = error
                    .context
                    .get("service")
                    .map(String::as_str)
                    .unwrap_or(SVC_GENERATION);
                self.hooks.open_circuit(service).await
            }
            RecoveryStrategy::ScaleResources => self.hooks.scale_resources().await,
            RecoveryStrategy::EnterFallbackMode => self.hooks.enter_fallback_mode().await,
            RecoveryStrategy::EmergencyMaintenance => self.hooks.emergency_maintenance().await,
        }
    }
}
