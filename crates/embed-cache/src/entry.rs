//! Cached embedding entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use embed_types::Embedding;

use crate::error::CacheError;
use crate::key::CacheMeta;

/// One cached embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Exact content-addressed key
    pub key: String,

    /// Loose alias key, kept here so deletes can clean the alias row
    pub alias: String,

    /// The embedding vector (normalized)
    pub vector: Vec<f32>,

    /// Vector dimension
    pub dimension: usize,

    /// When the entry was first created
    pub created_at: DateTime<Utc>,

    /// When the entry was last served
    pub last_accessed_at: DateTime<Utc>,

    /// Number of times the entry has been served
    pub hit_count: u64,

    /// Provider identity the vector belongs to
    pub meta: CacheMeta,
}

impl CacheEntry {
    /// Create a fresh entry.
    pub fn new(key: String, alias: String, embedding: &Embedding, meta: CacheMeta) -> Self {
        let now = Utc::now();
        Self {
            key,
            alias,
            dimension: embedding.dimension(),
            vector: embedding.values.clone(),
            created_at: now,
            last_accessed_at: now,
            hit_count: 0,
            meta,
        }
    }

    /// Record a hit: bump the counter and refresh the access timestamp.
    pub fn touch(&mut self) {
        self.hit_count += 1;
        self.last_accessed_at = Utc::now();
    }

    /// Reconstruct the embedding (vectors are stored pre-normalized).
    pub fn embedding(&self) -> Embedding {
        Embedding::from_normalized(self.vector.clone())
    }

    /// Age of the entry in seconds.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    /// Serialize to JSON bytes, verifying the dimension invariant.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        if self.vector.len() != self.dimension {
            return Err(CacheError::CorruptEntry {
                key: self.key.clone(),
                expected: self.dimension,
                actual: self.vector.len(),
            });
        }
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CacheEntry {
        CacheEntry::new(
            "key-1".to_string(),
            "alias-1".to_string(),
            &Embedding::from_normalized(vec![0.6, 0.8]),
            CacheMeta::new("openai", "text-embedding-3-small", 2),
        )
    }

    #[test]
    fn test_roundtrip() {
        let e = entry();
        let decoded = CacheEntry::from_bytes(&e.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.key, "key-1");
        assert_eq!(decoded.vector, vec![0.6, 0.8]);
        assert_eq!(decoded.meta.provider, "openai");
    }

    #[test]
    fn test_touch_bumps_hit_count() {
        let mut e = entry();
        assert_eq!(e.hit_count, 0);
        e.touch();
        e.touch();
        assert_eq!(e.hit_count, 2);
        assert!(e.last_accessed_at >= e.created_at);
    }

    #[test]
    fn test_corrupt_entry_rejected() {
        let mut e = entry();
        e.dimension = 3;
        assert!(matches!(
            e.to_bytes(),
            Err(CacheError::CorruptEntry { .. })
        ));
    }
}
