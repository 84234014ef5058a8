//! Content-addressed cache keys.
//!
//! The key is a pure function of (normalized text, provider, model,
//! dimension): two identical requests always produce the same key, and a
//! provider or model change produces a different one.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Provider identity a cached vector belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// Provider id ("openai", "voyage")
    pub provider: String,
    /// Model identifier
    pub model: String,
    /// Embedding dimension
    pub dimension: usize,
}

impl CacheMeta {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            dimension,
        }
    }
}

/// Normalize text for keying: trim and collapse whitespace runs.
///
/// Case is preserved - embeddings are case-sensitive, so "Hello" and
/// "hello" are distinct cache entries.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Looser digest input for near-duplicate lookups: case-folded,
/// alphanumeric-only. "Hello, World!" and "hello world" collide here.
fn loose_text(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn digest(text: &str, meta: &CacheMeta) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0u8]);
    hasher.update(meta.provider.as_bytes());
    hasher.update([0u8]);
    hasher.update(meta.model.as_bytes());
    hasher.update([0u8]);
    hasher.update(meta.dimension.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Cache key derivation.
pub struct CacheKey;

impl CacheKey {
    /// Exact key: sha256 over normalized text + provider identity.
    pub fn derive(text: &str, meta: &CacheMeta) -> String {
        digest(&normalize_text(text), meta)
    }

    /// Loose alias key for near-duplicate fallback lookups.
    pub fn loose(text: &str, meta: &CacheMeta) -> String {
        digest(&loose_text(text), meta)
    }
}
