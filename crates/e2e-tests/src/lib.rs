//! End-to-end test infrastructure for embed-gateway.
//!
//! Provides a shared TestHarness wiring a scripted provider, a real
//! RocksDB-backed cache, circuit breakers, and recording collaborators
//! for degradation and telemetry events.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use embed_cache::{EmbeddingCache, RocksDbStore};
use embed_orchestrator::{DeferredQueue, QueueError, ResilientEmbedder};
use embed_providers::{EmbeddingProvider, ProviderError};
use embed_resilience::CircuitBreaker;
use embed_types::{
    CircuitTransition, DegradationError, DegradationNotifier, EmbedJob, EmbedJobBatch, Embedding,
    FailureKind, ProviderCall, Settings, TelemetrySink,
};

/// Install a tracing subscriber for test debugging (idempotent).
///
/// Honors RUST_LOG, e.g. `RUST_LOG=embed_orchestrator=debug cargo test`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Scripted embedding provider with deterministic vectors and
/// controllable failures.
pub struct ScriptedProvider {
    dimension: usize,
    pub configured: AtomicBool,
    /// Upcoming single calls to fail with a retryable 503
    pub fail_singles_remaining: AtomicU32,
    /// Upcoming batch calls to fail with a retryable 503
    pub fail_batches_remaining: AtomicU32,
    /// Texts the provider always rejects (whole batch included)
    pub fail_texts: Mutex<HashSet<String>>,
    /// Artificial latency per call
    pub delay: Mutex<Duration>,
    pub single_calls: AtomicU32,
    pub batch_calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            configured: AtomicBool::new(true),
            fail_singles_remaining: AtomicU32::new(0),
            fail_batches_remaining: AtomicU32::new(0),
            fail_texts: Mutex::new(HashSet::new()),
            delay: Mutex::new(Duration::ZERO),
            single_calls: AtomicU32::new(0),
            batch_calls: AtomicU32::new(0),
        }
    }

    /// Mark a text as permanently rejected (provider-side 400).
    pub fn reject_text(&self, text: &str) {
        self.fail_texts.lock().unwrap().insert(text.to_string());
    }

    /// Deterministic vector derived from the text.
    pub fn vector_for(&self, text: &str) -> Embedding {
        let seed = text.bytes().map(|b| b as f32).sum::<f32>() + 1.0;
        Embedding::new((0..self.dimension).map(|i| seed + i as f32).collect())
    }

    fn scripted_delay(&self) -> Duration {
        *self.delay.lock().unwrap()
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.scripted_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self
            .fail_singles_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Http {
                status: 503,
                body: "scripted outage".to_string(),
            });
        }
        if self.fail_texts.lock().unwrap().contains(text) {
            return Err(ProviderError::Http {
                status: 400,
                body: format!("rejected: {}", text),
            });
        }
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, ProviderError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.scripted_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self
            .fail_batches_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Http {
                status: 503,
                body: "scripted outage".to_string(),
            });
        }
        {
            let rejected = self.fail_texts.lock().unwrap();
            if texts.iter().any(|t| rejected.contains(t)) {
                return Err(ProviderError::Http {
                    status: 500,
                    body: "batch contains rejected text".to_string(),
                });
            }
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Notifier recording every degradation kind it sees.
#[derive(Default)]
pub struct RecordingNotifier {
    pub kinds: Mutex<Vec<FailureKind>>,
}

impl DegradationNotifier for RecordingNotifier {
    fn notify(&self, error: &DegradationError) {
        self.kinds.lock().unwrap().push(error.kind);
    }
}

/// Telemetry sink recording provider calls and circuit transitions.
#[derive(Default)]
pub struct RecordingSink {
    pub calls: Mutex<Vec<ProviderCall>>,
    pub transitions: Mutex<Vec<CircuitTransition>>,
}

impl TelemetrySink for RecordingSink {
    fn provider_call(&self, event: ProviderCall) {
        self.calls.lock().unwrap().push(event);
    }

    fn circuit_transition(&self, event: CircuitTransition) {
        self.transitions.lock().unwrap().push(event);
    }
}

/// In-memory deferred queue.
#[derive(Default)]
pub struct MemoryQueue {
    pub jobs: Mutex<VecDeque<EmbedJob>>,
    pub batch_jobs: Mutex<VecDeque<EmbedJobBatch>>,
}

impl MemoryQueue {
    pub fn pop(&self) -> Option<EmbedJob> {
        self.jobs.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl DeferredQueue for MemoryQueue {
    async fn enqueue(&self, job: EmbedJob) -> Result<(), QueueError> {
        self.jobs.lock().unwrap().push_back(job);
        Ok(())
    }

    async fn enqueue_batch(&self, job: EmbedJobBatch) -> Result<(), QueueError> {
        self.batch_jobs.lock().unwrap().push_back(job);
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.jobs.lock().unwrap().len() + self.batch_jobs.lock().unwrap().len())
    }
}

/// Test settings: fast retries, threshold of five, long cool-down so
/// circuits stay open unless a test opts into probing.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.provider.dimension = 4;
    settings.cache.maintenance_probability = 0.0;
    settings.circuit.failure_threshold = 5;
    settings.circuit.cooldown_secs = 60;
    settings.retry.max_retries = 0;
    settings.retry.initial_interval_ms = 1;
    settings.retry.max_interval_ms = 2;
    settings.batch.item_fallback_delay_ms = 0;
    settings
}

/// Shared test harness wiring the full stack over a RocksDB cache.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: TempDir,
    pub provider: Arc<ScriptedProvider>,
    pub cache: Arc<EmbeddingCache>,
    pub breaker: Arc<CircuitBreaker>,
    pub embedder: Arc<ResilientEmbedder>,
    pub notifier: Arc<RecordingNotifier>,
    pub telemetry: Arc<RecordingSink>,
    pub settings: Settings,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = RocksDbStore::open(&temp_dir.path().join("embedding-cache"))
            .expect("Failed to open cache store");

        let provider = Arc::new(ScriptedProvider::new(settings.provider.dimension));
        let notifier = Arc::new(RecordingNotifier::default());
        let telemetry = Arc::new(RecordingSink::default());

        let cache = Arc::new(EmbeddingCache::new(Arc::new(store), settings.cache.clone()));
        let breaker = Arc::new(CircuitBreaker::new(
            settings.circuit.clone(),
            telemetry.clone(),
        ));

        let embedder = Arc::new(
            ResilientEmbedder::new(
                provider.clone(),
                cache.clone(),
                breaker.clone(),
                &settings,
            )
            .with_notifier(notifier.clone())
            .with_telemetry(telemetry.clone()),
        );

        Self {
            _temp_dir: temp_dir,
            provider,
            cache,
            breaker,
            embedder,
            notifier,
            telemetry,
            settings,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
