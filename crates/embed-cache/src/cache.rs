//! The embedding cache facade.
//!
//! Wraps a [`CacheStore`] with content-addressed keying, hit accounting,
//! TTL/LRU maintenance, and never-propagate failure semantics: a broken
//! store degrades to "always miss" instead of breaking generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use embed_types::{CacheSettings, Embedding};

use crate::entry::CacheEntry;
use crate::key::{CacheKey, CacheMeta};
use crate::store::CacheStore;

/// Aggregate cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of stored entries
    pub entries: usize,
    /// Hits observed by this process
    pub hits: u64,
    /// Misses observed by this process
    pub misses: u64,
    /// hits / (hits + misses), 0.0 when no lookups yet
    pub hit_rate: f64,
    /// Mean dimension across entries
    pub avg_dimension: f64,
    /// Oldest entry creation time
    pub oldest: Option<DateTime<Utc>>,
    /// Newest entry creation time
    pub newest: Option<DateTime<Utc>>,
}

/// Result of a maintenance pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceStats {
    /// Entries removed because they outlived the TTL
    pub expired_removed: usize,
    /// Entries removed to enforce the max-entry bound (LRU first)
    pub lru_removed: usize,
}

/// Content-addressed embedding cache.
pub struct EmbeddingCache {
    store: Arc<dyn CacheStore>,
    config: CacheSettings,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Create a cache over the given backend.
    pub fn new(store: Arc<dyn CacheStore>, config: CacheSettings) -> Self {
        Self {
            store,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up the embedding for a text. Store failures degrade to a miss.
    pub fn get(&self, text: &str, meta: &CacheMeta) -> Option<Embedding> {
        let key = CacheKey::derive(text, meta);
        self.get_by_key(&key)
    }

    /// Near-duplicate lookup through the loose alias key.
    ///
    /// Serves the degraded fallback path: a previously cached vector for a
    /// trivially different rendering of the same text.
    pub fn get_near(&self, text: &str, meta: &CacheMeta) -> Option<Embedding> {
        let alias = CacheKey::loose(text, meta);
        let primary = match self.store.resolve_alias(&alias) {
            Ok(Some(primary)) => primary,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Cache alias lookup failed, treating as miss");
                return None;
            }
        };
        self.get_by_key(&primary)
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.age_secs(Utc::now()) > self.config.ttl_secs as i64
    }

    fn get_by_key(&self, key: &str) -> Option<Embedding> {
        match self.store.get(key) {
            Ok(Some(mut entry)) => {
                if self.is_expired(&entry) {
                    debug!(key = %entry.key, "Cache entry expired");
                    if let Err(e) = self.store.delete(&entry.key) {
                        warn!(error = %e, "Failed to remove expired entry");
                    }
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }

                entry.touch();
                let embedding = entry.embedding();
                if let Err(e) = self.store.put(&entry) {
                    warn!(error = %e, "Failed to refresh entry access time");
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(embedding)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(error = %e, "Cache read failed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Bulk lookup: returns only the hits, keyed by the original text.
    pub fn get_many(&self, texts: &[String], meta: &CacheMeta) -> HashMap<String, Embedding> {
        let keys: Vec<String> = texts.iter().map(|t| CacheKey::derive(t, meta)).collect();

        let found = match self.store.get_many(&keys) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Bulk cache read failed, treating all as misses");
                self.misses
                    .fetch_add(texts.len() as u64, Ordering::Relaxed);
                return HashMap::new();
            }
        };

        let mut results = HashMap::new();
        for (text, entry) in texts.iter().zip(found) {
            match entry {
                Some(mut entry) if !self.is_expired(&entry) => {
                    entry.touch();
                    results.insert(text.clone(), entry.embedding());
                    if let Err(e) = self.store.put(&entry) {
                        warn!(error = %e, "Failed to refresh entry access time");
                    }
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                _ => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        results
    }

    /// Upsert an embedding. Returns false (and logs) instead of failing.
    pub fn put(&self, text: &str, embedding: &Embedding, meta: &CacheMeta) -> bool {
        if embedding.dimension() != meta.dimension {
            warn!(
                expected = meta.dimension,
                actual = embedding.dimension(),
                "Refusing to cache vector with mismatched dimension"
            );
            return false;
        }

        let key = CacheKey::derive(text, meta);
        let alias = CacheKey::loose(text, meta);

        // Merge-on-key: keep the original creation time and hit count,
        // refresh the vector and access time.
        let entry = match self.store.get(&key) {
            Ok(Some(mut existing)) => {
                existing.vector = embedding.values.clone();
                existing.dimension = embedding.dimension();
                existing.last_accessed_at = Utc::now();
                existing
            }
            _ => CacheEntry::new(key, alias, embedding, meta.clone()),
        };

        let stored = match self.store.put(&entry) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Cache write failed, continuing uncached");
                false
            }
        };

        self.maybe_maintain();
        stored
    }

    /// Upsert several embeddings; returns how many were stored.
    pub fn put_many(&self, items: &[(String, Embedding)], meta: &CacheMeta) -> usize {
        items
            .iter()
            .filter(|(text, embedding)| self.put(text, embedding, meta))
            .count()
    }

    /// Remove every entry matching the predicate (e.g. on model rollover).
    pub fn invalidate(&self, pred: impl Fn(&CacheEntry) -> bool) -> usize {
        match self.store.delete_where(&pred) {
            Ok(count) => {
                debug!(removed = count, "Cache invalidation pass");
                count
            }
            Err(e) => {
                warn!(error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// Remove all entries.
    pub fn clear(&self) -> usize {
        self.invalidate(|_| true)
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        let mut entries = 0usize;
        let mut dimension_sum = 0u64;
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;

        let scan = self.store.for_each(&mut |entry| {
            entries += 1;
            dimension_sum += entry.dimension as u64;
            oldest = Some(match oldest {
                Some(t) => t.min(entry.created_at),
                None => entry.created_at,
            });
            newest = Some(match newest {
                Some(t) => t.max(entry.created_at),
                None => entry.created_at,
            });
        });
        if let Err(e) = scan {
            warn!(error = %e, "Cache stats scan failed");
        }

        CacheStats {
            entries,
            hits,
            misses,
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            avg_dimension: if entries > 0 {
                dimension_sum as f64 / entries as f64
            } else {
                0.0
            },
            oldest,
            newest,
        }
    }

    /// Run a maintenance pass on a configured fraction of writes.
    ///
    /// Probabilistic trigger avoids a dedicated scheduler thread.
    fn maybe_maintain(&self) {
        if self.config.maintenance_probability <= 0.0 {
            return;
        }
        if rand::random::<f64>() < self.config.maintenance_probability {
            let stats = self.maintain();
            if stats.expired_removed + stats.lru_removed > 0 {
                debug!(
                    expired = stats.expired_removed,
                    lru = stats.lru_removed,
                    "Cache maintenance pass"
                );
            }
        }
    }

    /// Evict expired entries, then enforce the max-entry bound LRU-first.
    pub fn maintain(&self) -> MaintenanceStats {
        let now = Utc::now();
        let ttl_secs = self.config.ttl_secs as i64;

        let mut live: Vec<(String, DateTime<Utc>)> = Vec::new();
        let mut expired: Vec<String> = Vec::new();

        let scan = self.store.for_each(&mut |entry| {
            if entry.age_secs(now) > ttl_secs {
                expired.push(entry.key.clone());
            } else {
                live.push((entry.key.clone(), entry.last_accessed_at));
            }
        });
        if let Err(e) = scan {
            warn!(error = %e, "Cache maintenance scan failed");
            return MaintenanceStats::default();
        }

        let mut stats = MaintenanceStats::default();
        for key in &expired {
            match self.store.delete(key) {
                Ok(()) => stats.expired_removed += 1,
                Err(e) => warn!(error = %e, "Failed to evict expired entry"),
            }
        }

        if live.len() > self.config.max_entries {
            let excess = live.len() - self.config.max_entries;
            live.sort_by_key(|(_, last_accessed)| *last_accessed);
            for (key, _) in live.iter().take(excess) {
                match self.store.delete(key) {
                    Ok(()) => stats.lru_removed += 1,
                    Err(e) => warn!(error = %e, "Failed to evict LRU entry"),
                }
            }
        }

        stats
    }
}
