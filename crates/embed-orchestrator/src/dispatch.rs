//! Sync vs. deferred dispatch.
//!
//! Deferred execution is chosen only when (a) it is globally enabled,
//! (b) the call carries the collection identifiers needed to resume later,
//! and (c) the owning collection has not opted out. Everything else runs
//! inline through the orchestrator. A deferred call returns `Queued`
//! immediately; the worker re-enters the orchestrator later and the cache
//! upsert absorbs at-least-once re-delivery.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use embed_types::{
    DegradationError, DispatchSettings, EmbedJob, EmbedJobBatch, Embedding, JobPriority,
};

use crate::orchestrator::ResilientEmbedder;

/// Deferred queue error.
#[derive(Debug, Error)]
#[error("Queue error: {0}")]
pub struct QueueError(pub String);

/// Deferred work queue collaborator.
///
/// At-least-once delivery is assumed; enqueue order is advisory.
#[async_trait]
pub trait DeferredQueue: Send + Sync {
    async fn enqueue(&self, job: EmbedJob) -> Result<(), QueueError>;

    async fn enqueue_batch(&self, job: EmbedJobBatch) -> Result<(), QueueError>;

    /// Current queue depth, for health reporting.
    async fn depth(&self) -> Result<usize, QueueError>;
}

/// Per-call context the selector inspects.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    pub server_id: Option<String>,
    pub collection_id: Option<String>,
    pub item_id: Option<String>,
}

impl DispatchContext {
    /// Context for a fully routable item.
    pub fn for_item(
        server_id: impl Into<String>,
        collection_id: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        Self {
            server_id: Some(server_id.into()),
            collection_id: Some(collection_id.into()),
            item_id: Some(item_id.into()),
        }
    }

    /// Whether the call carries enough routing to be resumed later.
    fn is_resumable(&self) -> bool {
        self.server_id.is_some() && self.collection_id.is_some() && self.item_id.is_some()
    }
}

/// Outcome of a dispatched single-item call.
#[derive(Debug)]
pub enum Dispatched {
    /// Ran synchronously; absent means degraded/skipped
    Completed(Option<Embedding>),
    /// Handed to the deferred queue; the embedding lands out-of-band
    Queued,
}

/// Outcome of a dispatched batch call.
#[derive(Debug)]
pub enum DispatchedBatch {
    /// Ran synchronously; item_id -> embedding
    Completed(BTreeMap<String, Embedding>),
    /// Handed to the deferred queue
    Queued,
}

/// Chooses between inline generation and the deferred queue.
pub struct Dispatcher {
    embedder: Arc<ResilientEmbedder>,
    queue: Option<Arc<dyn DeferredQueue>>,
    config: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        embedder: Arc<ResilientEmbedder>,
        queue: Option<Arc<dyn DeferredQueue>>,
        config: DispatchSettings,
    ) -> Self {
        Self {
            embedder,
            queue,
            config,
        }
    }

    /// The embedder this dispatcher routes into.
    pub fn embedder(&self) -> &Arc<ResilientEmbedder> {
        &self.embedder
    }

    /// Whether this call should go to the deferred queue.
    pub fn should_defer(&self, ctx: &DispatchContext) -> bool {
        if !self.config.deferred_enabled || self.queue.is_none() {
            return false;
        }
        if !ctx.is_resumable() {
            return false;
        }
        match &ctx.collection_id {
            Some(collection) => !self.config.deferred_opt_out.contains(collection),
            None => false,
        }
    }

    /// Dispatch a single embedding request.
    ///
    /// A queue that fails to accept the job degrades to the synchronous
    /// path rather than dropping the work.
    pub async fn dispatch(
        &self,
        text: &str,
        ctx: &DispatchContext,
        priority: JobPriority,
    ) -> Result<Dispatched, DegradationError> {
        if self.should_defer(ctx) {
            if let (Some(queue), Some(server_id), Some(collection_id), Some(item_id)) = (
                self.queue.as_ref(),
                ctx.server_id.clone(),
                ctx.collection_id.clone(),
                ctx.item_id.clone(),
            ) {
                let job = EmbedJob::new(server_id, collection_id, item_id, text, priority);
                let job_id = job.job_id.clone();

                match queue.enqueue(job).await {
                    Ok(()) => {
                        debug!(job_id = %job_id, "Embedding deferred to queue");
                        return Ok(Dispatched::Queued);
                    }
                    Err(e) => {
                        warn!(error = %e, "Queue rejected job, falling back to sync");
                    }
                }
            }
        }

        let embedding = self.embedder.generate(text).await?;
        Ok(Dispatched::Completed(embedding))
    }

    /// Dispatch a batch of (item_id, text) pairs for one collection.
    pub async fn dispatch_batch(
        &self,
        items: &BTreeMap<String, String>,
        ctx: &DispatchContext,
        priority: JobPriority,
    ) -> Result<DispatchedBatch, DegradationError> {
        if self.should_defer(ctx) {
            if let (Some(queue), Some(server_id), Some(collection_id)) = (
                self.queue.as_ref(),
                ctx.server_id.clone(),
                ctx.collection_id.clone(),
            ) {
                let job = EmbedJobBatch::new(server_id, collection_id, items.clone(), priority);
                let job_id = job.job_id.clone();

                match queue.enqueue_batch(job).await {
                    Ok(()) => {
                        debug!(job_id = %job_id, items = items.len(), "Batch deferred to queue");
                        return Ok(DispatchedBatch::Queued);
                    }
                    Err(e) => {
                        warn!(error = %e, "Queue rejected batch job, falling back to sync");
                    }
                }
            }
        }

        Ok(DispatchedBatch::Completed(self.run_batch(items).await?))
    }

    /// Worker re-entry point for a delivered single job.
    ///
    /// Safe under at-least-once delivery: a re-delivered job hits the cache
    /// and never reaches the provider twice.
    pub async fn process_job(&self, job: &EmbedJob) -> Result<Option<Embedding>, DegradationError> {
        debug!(job_id = %job.job_id, item = %job.item_id, "Processing deferred job");
        self.embedder.generate(&job.text).await
    }

    /// Worker re-entry point for a delivered batch job.
    pub async fn process_batch_job(
        &self,
        job: &EmbedJobBatch,
    ) -> Result<BTreeMap<String, Embedding>, DegradationError> {
        debug!(job_id = %job.job_id, items = job.items.len(), "Processing deferred batch job");
        self.run_batch(&job.items).await
    }

    async fn run_batch(
        &self,
        items: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, Embedding>, DegradationError> {
        let ids: Vec<&String> = items.keys().collect();
        let texts: Vec<String> = items.values().cloned().collect();

        let by_position = self.embedder.generate_batch(&texts).await?;
        Ok(by_position
            .into_iter()
            .map(|(position, embedding)| (ids[position].clone(), embedding))
            .collect())
    }
}
