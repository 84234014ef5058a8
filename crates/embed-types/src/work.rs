//! Deferred work items for queued embedding generation.
//!
//! Work items are handed to the deferred queue collaborator and later
//! re-enter the orchestrator from a background worker. The queue guarantees
//! at-least-once delivery, so re-processing the same item must be harmless
//! (the cache upsert absorbs duplicates).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Priority of a deferred work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

/// A single deferred embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedJob {
    /// ULID identifying this job instance (re-deliveries keep the same id)
    pub job_id: String,
    /// Originating server
    pub server_id: String,
    /// Target collection to write the embedding to
    pub collection_id: String,
    /// Item within the collection
    pub item_id: String,
    /// Text to embed
    pub text: String,
    /// Scheduling priority
    pub priority: JobPriority,
}

impl EmbedJob {
    /// Create a job with a fresh ULID.
    pub fn new(
        server_id: impl Into<String>,
        collection_id: impl Into<String>,
        item_id: impl Into<String>,
        text: impl Into<String>,
        priority: JobPriority,
    ) -> Self {
        Self {
            job_id: ulid::Ulid::new().to_string(),
            server_id: server_id.into(),
            collection_id: collection_id.into(),
            item_id: item_id.into(),
            text: text.into(),
            priority,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A deferred request covering several items of one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedJobBatch {
    /// ULID identifying this job instance
    pub job_id: String,
    /// Originating server
    pub server_id: String,
    /// Target collection
    pub collection_id: String,
    /// item_id -> text
    pub items: BTreeMap<String, String>,
    /// Scheduling priority
    pub priority: JobPriority,
}

impl EmbedJobBatch {
    /// Create a batch job with a fresh ULID.
    pub fn new(
        server_id: impl Into<String>,
        collection_id: impl Into<String>,
        items: BTreeMap<String, String>,
        priority: JobPriority,
    ) -> Self {
        Self {
            job_id: ulid::Ulid::new().to_string(),
            server_id: server_id.into(),
            collection_id: collection_id.into(),
            items,
            priority,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_roundtrip() {
        let job = EmbedJob::new("srv-1", "col-9", "item-42", "hello world", JobPriority::High);
        let bytes = job.to_bytes().unwrap();
        let decoded = EmbedJob::from_bytes(&bytes).unwrap();

        assert_eq!(job.job_id, decoded.job_id);
        assert_eq!(decoded.collection_id, "col-9");
        assert_eq!(decoded.priority, JobPriority::High);
    }

    #[test]
    fn test_batch_job_roundtrip() {
        let mut items = BTreeMap::new();
        items.insert("a".to_string(), "first text".to_string());
        items.insert("b".to_string(), "second text".to_string());

        let job = EmbedJobBatch::new("srv-1", "col-9", items, JobPriority::default());
        let decoded = EmbedJobBatch::from_bytes(&job.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.items.len(), 2);
        assert_eq!(decoded.priority, JobPriority::Normal);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
    }
}
