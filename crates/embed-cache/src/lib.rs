//! # embed-cache
//!
//! Content-addressed embedding cache.
//!
//! Vectors are stored under a deterministic key derived from the normalized
//! text and the provider/model/dimension that produced them, so identical
//! requests always collide into one entry and a model change never serves a
//! stale vector. Backed by either RocksDB ([`RocksDbStore`]) or a
//! process-local map ([`MemoryStore`]).
//!
//! Cache failures degrade to misses; they are logged and never propagate
//! into embedding generation.

pub mod cache;
pub mod entry;
pub mod error;
pub mod key;
pub mod rocks;
pub mod store;

pub use cache::{CacheStats, EmbeddingCache, MaintenanceStats};
pub use entry::CacheEntry;
pub use error::CacheError;
pub use key::{normalize_text, CacheKey, CacheMeta};
pub use rocks::RocksDbStore;
pub use store::{CacheStore, MemoryStore};
