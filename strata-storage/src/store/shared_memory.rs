//! In-process implementation of the persistent store contract.
//!
//! Clones share one map, so several caches in the same process observe each
//! other's writes the way separate processes observe a shared LMDB
//! environment. Useful for embedding and for exercising the facade without a
//! filesystem.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use strata_core::{
    apply_offset, CacheEntry, CacheValue, EntryMeta, MemoryUsage, StorageError, StrataResult,
    Timestamp,
};

use super::{value_size, PersistentStore};

/// Default capacity reported by [`SharedMemoryStore::memory_usage`] (64 MiB).
const DEFAULT_CAPACITY_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct SharedMemoryStore {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    available: bool,
    capacity_bytes: u64,
}

impl Default for SharedMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_BYTES)
    }

    /// Store reporting `capacity_bytes` as its total size.
    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            available: true,
            capacity_bytes,
        }
    }

    /// Store that reports itself unavailable and fails every operation
    /// with [`StorageError::Unavailable`].
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Write an entry with an explicit creation time.
    pub fn store_at(
        &self,
        key: &str,
        value: &CacheValue,
        ttl_secs: u64,
        created_at: Timestamp,
    ) -> StrataResult<()> {
        let mut entries = self.write()?;
        entries.insert(
            key.to_string(),
            CacheEntry {
                physical_key: key.to_string(),
                value: value.clone(),
                ttl_secs,
                created_at,
            },
        );
        Ok(())
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> StrataResult<RwLockReadGuard<'_, HashMap<String, CacheEntry>>> {
        if !self.available {
            return Err(StorageError::Unavailable.into());
        }
        Ok(self.entries.read().map_err(|_| StorageError::LockPoisoned)?)
    }

    fn write(&self) -> StrataResult<RwLockWriteGuard<'_, HashMap<String, CacheEntry>>> {
        if !self.available {
            return Err(StorageError::Unavailable.into());
        }
        Ok(self.entries.write().map_err(|_| StorageError::LockPoisoned)?)
    }

    fn adjust(&self, key: &str, offset: i64, increment: bool) -> StrataResult<Option<i64>> {
        let mut entries = self.write()?;
        let now = Utc::now();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                let next = apply_offset(&entry.value, offset, increment);
                entry.value = CacheValue::from(next);
                Ok(Some(next))
            }
            _ => Ok(None),
        }
    }
}

impl PersistentStore for SharedMemoryStore {
    fn is_available(&self) -> bool {
        self.available
    }

    fn fetch(&self, key: &str) -> StrataResult<Option<CacheEntry>> {
        let entries = self.read()?;
        let now = Utc::now();
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .cloned())
    }

    fn store(&self, key: &str, value: &CacheValue, ttl_secs: u64) -> StrataResult<()> {
        self.store_at(key, value, ttl_secs, Utc::now())
    }

    fn add(&self, key: &str, value: &CacheValue, ttl_secs: u64) -> StrataResult<bool> {
        let mut entries = self.write()?;
        let now = Utc::now();
        if entries.get(key).is_some_and(|entry| !entry.is_expired_at(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                physical_key: key.to_string(),
                value: value.clone(),
                ttl_secs,
                created_at: now,
            },
        );
        Ok(true)
    }

    fn delete(&self, key: &str) -> StrataResult<bool> {
        let mut entries = self.write()?;
        Ok(entries.remove(key).is_some())
    }

    fn increment(&self, key: &str, offset: i64) -> StrataResult<Option<i64>> {
        self.adjust(key, offset, true)
    }

    fn decrement(&self, key: &str, offset: i64) -> StrataResult<Option<i64>> {
        self.adjust(key, offset, false)
    }

    fn clear(&self) -> StrataResult<()> {
        let mut entries = self.write()?;
        entries.clear();
        Ok(())
    }

    fn entries(&self) -> StrataResult<Vec<EntryMeta>> {
        let entries = self.read()?;
        Ok(entries
            .values()
            .map(|entry| entry.meta(value_size(&entry.value)))
            .collect())
    }

    fn memory_usage(&self) -> StrataResult<MemoryUsage> {
        let used_bytes = self.entries()?.iter().map(|meta| meta.size_bytes).sum();
        Ok(MemoryUsage {
            used_bytes,
            total_bytes: self.capacity_bytes,
        })
    }
}
