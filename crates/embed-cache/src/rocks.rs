//! RocksDB cache backend.
//!
//! Two column families:
//! - `embeddings`: exact key -> serialized [`CacheEntry`]
//! - `aliases`: loose key -> exact key (near-duplicate lookups)
//!
//! Entry and alias rows are written in one atomic `WriteBatch`.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use tracing::info;

use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::store::CacheStore;

/// Column family for cache entries
pub const CF_ENTRIES: &str = "embeddings";
/// Column family for loose-key alias rows
pub const CF_ALIASES: &str = "aliases";

/// Durable cache store backed by RocksDB.
pub struct RocksDbStore {
    db: DB,
}

impl RocksDbStore {
    /// Open the store at the given path, creating if necessary.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        info!("Opening embedding cache at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(2);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Options::default()),
            ColumnFamilyDescriptor::new(CF_ALIASES, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self { db })
    }

    fn entries_cf(&self) -> Result<&rocksdb::ColumnFamily, CacheError> {
        self.db
            .cf_handle(CF_ENTRIES)
            .ok_or_else(|| CacheError::ColumnFamilyNotFound(CF_ENTRIES.to_string()))
    }

    fn aliases_cf(&self) -> Result<&rocksdb::ColumnFamily, CacheError> {
        self.db
            .cf_handle(CF_ALIASES)
            .ok_or_else(|| CacheError::ColumnFamilyNotFound(CF_ALIASES.to_string()))
    }
}

impl CacheStore for RocksDbStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let cf = self.entries_cf()?;
        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(CacheEntry::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let entries_cf = self.entries_cf()?;
        let aliases_cf = self.aliases_cf()?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&entries_cf, entry.key.as_bytes(), entry.to_bytes()?);
        batch.put_cf(&aliases_cf, entry.alias.as_bytes(), entry.key.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheEntry>>, CacheError> {
        let cf = self.entries_cf()?;
        let lookups: Vec<_> = keys.iter().map(|k| (&cf, k.as_bytes())).collect();

        let mut results = Vec::with_capacity(keys.len());
        for found in self.db.multi_get_cf(lookups) {
            match found? {
                Some(bytes) => results.push(Some(CacheEntry::from_bytes(&bytes)?)),
                None => results.push(None),
            }
        }
        Ok(results)
    }

    fn resolve_alias(&self, alias: &str) -> Result<Option<String>, CacheError> {
        let cf = self.aliases_cf()?;
        match self.db.get_cf(&cf, alias.as_bytes())? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        let entries_cf = self.entries_cf()?;
        let aliases_cf = self.aliases_cf()?;

        let mut batch = WriteBatch::default();
        if let Some(entry) = self.get(key)? {
            // Only drop the alias row if it still points at this entry
            if self.resolve_alias(&entry.alias)?.as_deref() == Some(key) {
                batch.delete_cf(&aliases_cf, entry.alias.as_bytes());
            }
        }
        batch.delete_cf(&entries_cf, key.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    fn delete_where(&self, pred: &dyn Fn(&CacheEntry) -> bool) -> Result<usize, CacheError> {
        let mut doomed = Vec::new();
        self.for_each(&mut |entry| {
            if pred(entry) {
                doomed.push(entry.key.clone());
            }
        })?;

        for key in &doomed {
            self.delete(key)?;
        }
        Ok(doomed.len())
    }

    fn for_each(&self, visit: &mut dyn FnMut(&CacheEntry)) -> Result<(), CacheError> {
        let cf = self.entries_cf()?;
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (_, value) = item?;
            let entry = CacheEntry::from_bytes(&value)?;
            visit(&entry);
        }
        Ok(())
    }

    fn count(&self) -> Result<usize, CacheError> {
        let cf = self.entries_cf()?;
        let mut count = 0;
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}
