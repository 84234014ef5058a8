//! Cache storage backend trait and the process-local implementation.

use dashmap::DashMap;

use crate::entry::CacheEntry;
use crate::error::CacheError;

/// Key-value backend for the embedding cache.
///
/// Upsert, point lookup, bulk lookup, predicate delete, count - nothing
/// more is required of a backend.
pub trait CacheStore: Send + Sync {
    /// Point lookup by exact key.
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Upsert an entry and its alias row atomically.
    fn put(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Bulk lookup; result positions match `keys`.
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheEntry>>, CacheError>;

    /// Resolve a loose alias to its primary key.
    fn resolve_alias(&self, alias: &str) -> Result<Option<String>, CacheError>;

    /// Delete an entry (and its alias row when it points back at it).
    fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every entry matching the predicate; returns the count removed.
    fn delete_where(&self, pred: &dyn Fn(&CacheEntry) -> bool) -> Result<usize, CacheError>;

    /// Visit every entry.
    fn for_each(&self, visit: &mut dyn FnMut(&CacheEntry)) -> Result<(), CacheError>;

    /// Number of entries.
    fn count(&self) -> Result<usize, CacheError>;
}

/// Process-local store backed by concurrent maps.
///
/// Used by tests and deployments that can afford to re-pay for embeddings
/// after a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
    aliases: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get(key).map(|e| e.clone()))
    }

    fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.aliases
            .insert(entry.alias.clone(), entry.key.clone());
        self.entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheEntry>>, CacheError> {
        Ok(keys
            .iter()
            .map(|k| self.entries.get(k).map(|e| e.clone()))
            .collect())
    }

    fn resolve_alias(&self, alias: &str) -> Result<Option<String>, CacheError> {
        Ok(self.aliases.get(alias).map(|k| k.clone()))
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.aliases
                .remove_if(&entry.alias, |_, primary| primary.as_str() == key);
        }
        Ok(())
    }

    fn delete_where(&self, pred: &dyn Fn(&CacheEntry) -> bool) -> Result<usize, CacheError> {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.key().clone())
            .collect();
        for key in &doomed {
            self.delete(key)?;
        }
        Ok(doomed.len())
    }

    fn for_each(&self, visit: &mut dyn FnMut(&CacheEntry)) -> Result<(), CacheError> {
        for entry in self.entries.iter() {
            visit(entry.value());
        }
        Ok(())
    }

    fn count(&self) -> Result<usize, CacheError> {
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheMeta;
    use embed_types::Embedding;

    fn entry(key: &str, alias: &str) -> CacheEntry {
        CacheEntry::new(
            key.to_string(),
            alias.to_string(),
            &Embedding::from_normalized(vec![1.0, 0.0]),
            CacheMeta::new("openai", "m", 2),
        )
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        store.put(&entry("k1", "a1")).unwrap();

        let got = store.get("k1").unwrap().unwrap();
        assert_eq!(got.key, "k1");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_put_is_upsert() {
        let store = MemoryStore::new();
        store.put(&entry("k1", "a1")).unwrap();
        store.put(&entry("k1", "a1")).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_alias_resolution() {
        let store = MemoryStore::new();
        store.put(&entry("k1", "a1")).unwrap();
        assert_eq!(store.resolve_alias("a1").unwrap(), Some("k1".to_string()));
        assert_eq!(store.resolve_alias("missing").unwrap(), None);
    }

    #[test]
    fn test_delete_cleans_alias() {
        let store = MemoryStore::new();
        store.put(&entry("k1", "a1")).unwrap();
        store.delete("k1").unwrap();
        assert_eq!(store.resolve_alias("a1").unwrap(), None);
        assert!(store.get("k1").unwrap().is_none());
    }

    #[test]
    fn test_delete_where() {
        let store = MemoryStore::new();
        store.put(&entry("k1", "a1")).unwrap();
        store.put(&entry("k2", "a2")).unwrap();

        let removed = store.delete_where(&|e| e.key == "k1").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_get_many_preserves_positions() {
        let store = MemoryStore::new();
        store.put(&entry("k1", "a1")).unwrap();

        let results = store
            .get_many(&["missing".to_string(), "k1".to_string()])
            .unwrap();
        assert!(results[0].is_none());
        assert_eq!(results[1].as_ref().unwrap().key, "k1");
    }
}
