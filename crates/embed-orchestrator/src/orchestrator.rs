//! The resilient embedding orchestrator.
//!
//! Call path: cache -> (miss) circuit breaker -> retrying provider call.
//! Successful vectors are cached immediately so a later crash never loses
//! already-purchased work; failures degrade to absent results or typed
//! partial outcomes instead of failing the caller's whole operation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use embed_cache::{CacheKey, CacheMeta, EmbeddingCache};
use embed_providers::{EmbeddingProvider, ProviderError};
use embed_resilience::{retry, CircuitBreaker, RetryPolicy};
use embed_types::{
    BatchOutcome, BatchSettings, CallOutcome, DegradationError, DegradationNotifier, Embedding,
    FailureKind, LogNotifier, LogSink, ProviderCall, Settings, TelemetrySink,
};

use crate::inflight::InFlightSet;
use crate::tokens::{split_batches, TokenEstimator};

/// Circuit name guarding single-item generation.
pub const SVC_GENERATION: &str = "embedding_generation";
/// Circuit name guarding batch generation. Independent of [`SVC_GENERATION`].
pub const SVC_BATCH: &str = "embedding_batch_generation";

/// Resilient embedding facade.
///
/// Dependencies are constructor-injected; multiple independent instances
/// (e.g. per tenant) can coexist without shared state.
pub struct ResilientEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    breaker: Arc<CircuitBreaker>,
    retry_policy: RetryPolicy,
    batch: BatchSettings,
    cost_per_1k_tokens: f64,
    tokens: TokenEstimator,
    notifier: Arc<dyn DegradationNotifier>,
    telemetry: Arc<dyn TelemetrySink>,
    inflight: InFlightSet,
}

impl ResilientEmbedder {
    /// Create an orchestrator over the given collaborators.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        breaker: Arc<CircuitBreaker>,
        settings: &Settings,
    ) -> Self {
        Self {
            provider,
            cache,
            breaker,
            retry_policy: RetryPolicy::from_settings(&settings.retry),
            batch: settings.batch.clone(),
            cost_per_1k_tokens: settings.provider.cost_per_1k_tokens,
            tokens: TokenEstimator::new(),
            notifier: Arc::new(LogNotifier),
            telemetry: Arc::new(LogSink),
            inflight: InFlightSet::new(),
        }
    }

    /// Replace the degradation notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn DegradationNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// The in-flight de-duplication set (exposed for health checks).
    pub fn in_flight(&self) -> &InFlightSet {
        &self.inflight
    }

    fn meta(&self) -> CacheMeta {
        CacheMeta::new(
            self.provider.id(),
            self.provider.model(),
            self.provider.dimension(),
        )
    }

    /// Generate one embedding.
    ///
    /// Absent means "continue without semantics": empty input, a skipped
    /// duplicate in-flight request, or a degraded provider after retries.
    /// Degradations are reported through the notifier, never as a hard
    /// failure of the caller's operation.
    pub async fn generate(&self, text: &str) -> Result<Option<Embedding>, DegradationError> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let meta = self.meta();
        if let Some(hit) = self.cache.get(text, &meta) {
            return Ok(Some(hit));
        }

        if !self.provider.is_configured() {
            let err = DegradationError::new(FailureKind::ConfigInvalid)
                .with_context("service", SVC_GENERATION)
                .with_context("provider", self.provider.id());
            self.notifier.notify(&err);
            return Ok(None);
        }

        let key = CacheKey::derive(text, &meta);
        let _claim = match self.inflight.claim(&key) {
            Some(claim) => claim,
            None => {
                debug!(key = %key, "Identical text already in flight, skipping");
                return Ok(None);
            }
        };

        // The first flight may have landed between our miss and the claim.
        if let Some(hit) = self.cache.get(text, &meta) {
            return Ok(Some(hit));
        }

        let token_estimate = self.tokens.estimate(text);
        let meta_ref = &meta;

        self.breaker
            .execute(
                SVC_GENERATION,
                move || async move { self.single_primary(text, meta_ref, token_estimate).await },
                move |err| async move {
                    self.single_fallback(err, text, meta_ref, token_estimate).await
                },
            )
            .await
    }

    async fn single_primary(
        &self,
        text: &str,
        meta: &CacheMeta,
        token_estimate: usize,
    ) -> Result<Option<Embedding>, DegradationError> {
        let embedding = retry(
            &self.retry_policy,
            SVC_GENERATION,
            || self.call_provider_single(text, token_estimate),
            |e: &ProviderError| e.retryable(),
            |e: &ProviderError| e.retry_after(),
        )
        .await
        .map_err(|e| self.degrade(e, SVC_GENERATION))?;

        self.cache.put(text, &embedding, meta);
        Ok(Some(embedding))
    }

    async fn single_fallback(
        &self,
        err: DegradationError,
        text: &str,
        meta: &CacheMeta,
        token_estimate: usize,
    ) -> Result<Option<Embedding>, DegradationError> {
        if err.kind == FailureKind::CircuitOpen {
            self.emit_call(
                SVC_GENERATION,
                1,
                token_estimate,
                Duration::ZERO,
                CallOutcome::ShortCircuited,
            );
        }

        let near = self.cache.get_near(text, meta);
        if near.is_some() {
            debug!("Serving near-duplicate cached vector as degraded substitute");
        }
        self.notifier.notify(&err);
        Ok(near)
    }

    /// Generate embeddings for a batch of texts.
    ///
    /// Returns position -> embedding when every input succeeds. Mixed
    /// results fail with a `PartialBatchFailure` carrying both maps; a
    /// fully failed batch fails with `VectorUnavailable`. Every input
    /// position is accounted for in exactly one of the outcome maps.
    pub async fn generate_batch(
        &self,
        texts: &[String],
    ) -> Result<BTreeMap<usize, Embedding>, DegradationError> {
        if texts.is_empty() {
            return Ok(BTreeMap::new());
        }

        let meta = self.meta();
        if !self.provider.is_configured() {
            let err = DegradationError::new(FailureKind::ConfigInvalid)
                .with_context("service", SVC_BATCH)
                .with_context("provider", self.provider.id());
            self.notifier.notify(&err);
            return Err(err);
        }

        let mut outcome = BatchOutcome::default();

        // Identical texts collapse to one lookup/one provider item and fan
        // back out to every original position.
        let mut positions_by_text: HashMap<&str, Vec<usize>> = HashMap::new();
        for (position, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                outcome.record_failure(position, "empty text");
            } else {
                positions_by_text
                    .entry(text.as_str())
                    .or_default()
                    .push(position);
            }
        }

        let unique: Vec<String> = positions_by_text.keys().map(|t| t.to_string()).collect();
        let hits = self.cache.get_many(&unique, &meta);
        for (text, embedding) in &hits {
            for &position in &positions_by_text[text.as_str()] {
                outcome.record_success(position, embedding.clone());
            }
        }

        let misses: Vec<String> = unique
            .iter()
            .filter(|t| !hits.contains_key(*t))
            .cloned()
            .collect();

        debug!(
            total = texts.len(),
            unique = unique.len(),
            cached = hits.len(),
            to_generate = misses.len(),
            "Batch embedding request"
        );

        for chunk in split_batches(
            &misses,
            &self.tokens,
            self.batch.max_batch_items,
            self.batch.max_batch_tokens,
        ) {
            match self.embed_chunk(&chunk, &meta).await {
                Ok(per_item) => {
                    for (text, result) in chunk.iter().zip(per_item) {
                        match result {
                            Ok(embedding) => {
                                for &position in &positions_by_text[text.as_str()] {
                                    outcome.record_success(position, embedding.clone());
                                }
                            }
                            Err(reason) => {
                                for &position in &positions_by_text[text.as_str()] {
                                    outcome.record_failure(position, reason.clone());
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    let reason = err.to_string();
                    for text in &chunk {
                        for &position in &positions_by_text[text.as_str()] {
                            outcome.record_failure(position, reason.clone());
                        }
                    }
                }
            }
        }

        if outcome.failed.is_empty() {
            return Ok(outcome.successful);
        }

        let kind = if outcome.successful.is_empty() {
            FailureKind::VectorUnavailable
        } else {
            FailureKind::PartialBatchFailure
        };

        let err = DegradationError::new(kind)
            .with_context("service", SVC_BATCH)
            .with_context("successful", outcome.successful.len().to_string())
            .with_context("failed", outcome.failed.len().to_string())
            .with_outcome(outcome);
        self.notifier.notify(&err);
        Err(err)
    }

    /// Run one sub-batch through the batch circuit.
    ///
    /// Result positions match `chunk`. A total sub-batch failure falls back
    /// to per-item generation when enabled (never while the circuit is
    /// open - that would defeat the short-circuit).
    async fn embed_chunk(
        &self,
        chunk: &[String],
        meta: &CacheMeta,
    ) -> Result<Vec<Result<Embedding, String>>, DegradationError> {
        let token_estimate = self.tokens.estimate_many(chunk);
        let meta_ref = meta;

        self.breaker
            .execute(
                SVC_BATCH,
                move || async move { self.chunk_primary(chunk, meta_ref, token_estimate).await },
                move |err| async move {
                    self.chunk_fallback(err, chunk, meta_ref, token_estimate).await
                },
            )
            .await
    }

    async fn chunk_primary(
        &self,
        chunk: &[String],
        meta: &CacheMeta,
        token_estimate: usize,
    ) -> Result<Vec<Result<Embedding, String>>, DegradationError> {
        let embeddings = retry(
            &self.retry_policy,
            SVC_BATCH,
            || self.call_provider_batch(chunk, token_estimate),
            |e: &ProviderError| e.retryable(),
            |e: &ProviderError| e.retry_after(),
        )
        .await
        .map_err(|e| self.degrade(e, SVC_BATCH))?;

        // Cache as we go: purchased work survives anything downstream.
        for (text, embedding) in chunk.iter().zip(&embeddings) {
            self.cache.put(text, embedding, meta);
        }

        Ok(embeddings.into_iter().map(Ok).collect())
    }

    async fn chunk_fallback(
        &self,
        err: DegradationError,
        chunk: &[String],
        meta: &CacheMeta,
        token_estimate: usize,
    ) -> Result<Vec<Result<Embedding, String>>, DegradationError> {
        if err.kind == FailureKind::CircuitOpen {
            self.emit_call(
                SVC_BATCH,
                chunk.len(),
                token_estimate,
                Duration::ZERO,
                CallOutcome::ShortCircuited,
            );
            return Err(err);
        }

        if !self.batch.item_fallback {
            return Err(err);
        }

        warn!(
            error = %err,
            items = chunk.len(),
            "Sub-batch failed, retrying item by item"
        );
        let delay = Duration::from_millis(self.batch.item_fallback_delay_ms);

        let mut results = Vec::with_capacity(chunk.len());
        for (i, text) in chunk.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let attempt = retry(
                &self.retry_policy,
                SVC_GENERATION,
                || self.call_provider_single(text, self.tokens.estimate(text)),
                |e: &ProviderError| e.retryable(),
                |e: &ProviderError| e.retry_after(),
            )
            .await;

            match attempt {
                Ok(embedding) => {
                    self.cache.put(text, &embedding, meta);
                    results.push(Ok(embedding));
                }
                Err(e) => results.push(Err(e.to_string())),
            }
        }

        Ok(results)
    }

    async fn call_provider_single(
        &self,
        text: &str,
        token_estimate: usize,
    ) -> Result<Embedding, ProviderError> {
        let started = Instant::now();
        let result = self.provider.embed(text).await;
        self.emit_call(
            SVC_GENERATION,
            1,
            token_estimate,
            started.elapsed(),
            outcome_of(&result),
        );
        result
    }

    async fn call_provider_batch(
        &self,
        texts: &[String],
        token_estimate: usize,
    ) -> Result<Vec<Embedding>, ProviderError> {
        let started = Instant::now();
        let result = self.provider.embed_batch(texts).await;
        self.emit_call(
            SVC_BATCH,
            texts.len(),
            token_estimate,
            started.elapsed(),
            outcome_of(&result),
        );
        result
    }

    fn degrade(&self, e: ProviderError, service: &str) -> DegradationError {
        DegradationError::new(e.failure_kind())
            .with_context("service", service)
            .with_source(e)
    }

    fn emit_call(
        &self,
        operation: &'static str,
        item_count: usize,
        token_estimate: usize,
        duration: Duration,
        outcome: CallOutcome,
    ) {
        self.telemetry.provider_call(ProviderCall {
            operation,
            item_count,
            token_estimate,
            cost_estimate: token_estimate as f64 / 1000.0 * self.cost_per_1k_tokens,
            duration,
            outcome,
        });
    }
}

fn outcome_of<T>(result: &Result<T, ProviderError>) -> CallOutcome {
    match result {
        Ok(_) => CallOutcome::Success,
        Err(ProviderError::RateLimited { .. }) => CallOutcome::RateLimited,
        Err(_) => CallOutcome::Failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use embed_cache::MemoryStore;
    use embed_types::{CacheSettings, NullSink, RetrySettings};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: counts calls, fails configured texts.
    struct MockProvider {
        dimension: usize,
        configured: bool,
        fail_texts: HashSet<String>,
        fail_batches: bool,
        single_calls: AtomicU32,
        batch_calls: AtomicU32,
    }

    impl MockProvider {
        fn reliable(dimension: usize) -> Self {
            Self {
                dimension,
                configured: true,
                fail_texts: HashSet::new(),
                fail_batches: false,
                single_calls: AtomicU32::new(0),
                batch_calls: AtomicU32::new(0),
            }
        }

        fn vector_for(&self, text: &str) -> Embedding {
            let seed = text.len() as f32 + 1.0;
            Embedding::new((0..self.dimension).map(|i| seed + i as f32).collect())
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockProvider {
        fn id(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_texts.contains(text) {
                return Err(ProviderError::Http {
                    status: 400,
                    body: format!("rejected: {}", text),
                });
            }
            Ok(self.vector_for(text))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, ProviderError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_batches || texts.iter().any(|t| self.fail_texts.contains(t)) {
                return Err(ProviderError::Http {
                    status: 500,
                    body: "batch rejected".to_string(),
                });
            }
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }
    }

    /// Notifier that records every degradation it sees.
    #[derive(Default)]
    struct RecordingNotifier {
        kinds: Mutex<Vec<FailureKind>>,
    }

    impl DegradationNotifier for RecordingNotifier {
        fn notify(&self, error: &DegradationError) {
            self.kinds.lock().unwrap().push(error.kind);
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.provider.dimension = 4;
        settings.cache = CacheSettings {
            maintenance_probability: 0.0,
            ..Default::default()
        };
        settings.retry = RetrySettings {
            max_retries: 1,
            initial_interval_ms: 1,
            max_interval_ms: 2,
        };
        settings.batch.item_fallback_delay_ms = 0;
        settings
    }

    fn embedder(provider: Arc<MockProvider>, settings: &Settings) -> ResilientEmbedder {
        let cache = Arc::new(EmbeddingCache::new(
            Arc::new(MemoryStore::new()),
            settings.cache.clone(),
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            settings.circuit.clone(),
            Arc::new(NullSink),
        ));
        ResilientEmbedder::new(provider, cache, breaker, settings)
    }

    #[tokio::test]
    async fn test_empty_text_returns_absent_without_call() {
        let provider = Arc::new(MockProvider::reliable(4));
        let embedder = embedder(provider.clone(), &settings());

        assert!(embedder.generate("   \n  ").await.unwrap().is_none());
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generate_caches_and_second_call_is_free() {
        let provider = Arc::new(MockProvider::reliable(4));
        let embedder = embedder(provider.clone(), &settings());

        let first = embedder.generate("hello").await.unwrap().unwrap();
        assert_eq!(first.dimension(), 4);
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 1);

        let second = embedder.generate("hello").await.unwrap().unwrap();
        assert_eq!(second.values, first.values);
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_degrades_to_absent() {
        let provider = Arc::new(MockProvider {
            configured: false,
            ..MockProvider::reliable(4)
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let embedder =
            embedder(provider.clone(), &settings()).with_notifier(notifier.clone());

        assert!(embedder.generate("hello").await.unwrap().is_none());
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            notifier.kinds.lock().unwrap().as_slice(),
            &[FailureKind::ConfigInvalid]
        );
    }

    #[tokio::test]
    async fn test_failed_generation_notifies_and_returns_absent() {
        let mut provider = MockProvider::reliable(4);
        provider.fail_texts.insert("bad".to_string());
        let provider = Arc::new(provider);

        let notifier = Arc::new(RecordingNotifier::default());
        let embedder =
            embedder(provider.clone(), &settings()).with_notifier(notifier.clone());

        let result = embedder.generate("bad").await.unwrap();
        assert!(result.is_none());
        // 400 is not retryable: exactly one attempt
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 1);
        assert!(!notifier.kinds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_all_success_with_dedup() {
        let provider = Arc::new(MockProvider::reliable(4));
        let embedder = embedder(provider.clone(), &settings());

        let texts = vec![
            "alpha".to_string(),
            "beta".to_string(),
            "alpha".to_string(),
        ];
        let result = embedder.generate_batch(&texts).await.unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result[&0].values, result[&2].values);
        // Duplicate collapsed before reaching the provider
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_uses_cache_before_provider() {
        let provider = Arc::new(MockProvider::reliable(4));
        let embedder = embedder(provider.clone(), &settings());

        embedder.generate("alpha").await.unwrap();
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 1);

        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let result = embedder.generate_batch(&texts).await.unwrap();
        assert_eq!(result.len(), 2);

        // Only "beta" was a miss
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_partial_failure_carries_both_maps() {
        let mut provider = MockProvider::reliable(4);
        provider.fail_texts.insert("poison".to_string());
        let provider = Arc::new(provider);
        let embedder = embedder(provider.clone(), &settings());

        let texts = vec![
            "good one".to_string(),
            "poison".to_string(),
            "good two".to_string(),
        ];
        let err = embedder.generate_batch(&texts).await.unwrap_err();

        assert_eq!(err.kind, FailureKind::PartialBatchFailure);
        let outcome = err.outcome.as_ref().unwrap();
        assert!(outcome.covers(3));
        assert_eq!(outcome.successful.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed.contains_key(&1));
    }

    #[tokio::test]
    async fn test_batch_partial_successes_are_cached() {
        let mut provider = MockProvider::reliable(4);
        provider.fail_texts.insert("poison".to_string());
        let provider = Arc::new(provider);
        let embedder = embedder(provider.clone(), &settings());

        let texts = vec!["survivor".to_string(), "poison".to_string()];
        let _ = embedder.generate_batch(&texts).await.unwrap_err();

        let singles_before = provider.single_calls.load(Ordering::SeqCst);
        let hit = embedder.generate("survivor").await.unwrap();
        assert!(hit.is_some());
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), singles_before);
    }

    #[tokio::test]
    async fn test_batch_total_failure_is_unavailable() {
        let provider = Arc::new(MockProvider {
            fail_batches: true,
            ..MockProvider::reliable(4)
        });
        let mut settings = settings();
        settings.batch.item_fallback = false;
        let embedder = embedder(provider.clone(), &settings);

        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embedder.generate_batch(&texts).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::VectorUnavailable);
        assert!(err.outcome.as_ref().unwrap().all_failed());
    }

    #[tokio::test]
    async fn test_empty_batch_positions_fail_explicitly() {
        let provider = Arc::new(MockProvider::reliable(4));
        let embedder = embedder(provider.clone(), &settings());

        let texts = vec!["real".to_string(), "  ".to_string()];
        let err = embedder.generate_batch(&texts).await.unwrap_err();

        let outcome = err.outcome.as_ref().unwrap();
        assert!(outcome.covers(2));
        assert_eq!(outcome.failed[&1], "empty text");
    }

    #[tokio::test]
    async fn test_sub_batch_split_by_item_cap() {
        let provider = Arc::new(MockProvider::reliable(4));
        let mut settings = settings();
        settings.batch.max_batch_items = 2;
        let embedder = embedder(provider.clone(), &settings);

        let texts: Vec<String> = (0..5).map(|i| format!("text number {}", i)).collect();
        let result = embedder.generate_batch(&texts).await.unwrap();

        assert_eq!(result.len(), 5);
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_item_fallback_recovers_individual_items() {
        // Batch endpoint always rejects; per-item fallback succeeds.
        let provider = Arc::new(MockProvider {
            fail_batches: true,
            ..MockProvider::reliable(4)
        });
        let embedder = embedder(provider.clone(), &settings());

        let texts = vec!["one".to_string(), "two".to_string()];
        let result = embedder.generate_batch(&texts).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 2);
    }
}
