//! Store tiers.
//!
//! - [`PersistentStore`]: the shared, atomic key-value boundary with TTLs.
//!   [`LmdbStore`] is the production backend; [`SharedMemoryStore`] keeps the
//!   same contract inside one process.
//! - [`NonPersistentStore`]: process-local fallback with no TTLs.
//! - [`LocalMirror`]: process-local read-through copy of persistent entries.

mod lmdb;
mod mirror;
mod non_persistent;
mod shared_memory;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use mirror::LocalMirror;
pub use non_persistent::NonPersistentStore;
pub use shared_memory::SharedMemoryStore;

use std::sync::Arc;
use strata_core::{CacheEntry, CacheValue, EntryMeta, MemoryUsage, StrataResult};

/// Atomic key-value store with TTL support, shared between processes.
///
/// Every method is a single-key atomic operation except [`clear`] and
/// [`entries`]. Expired entries are never returned and count as absent for
/// [`add`], [`increment`] and [`decrement`].
///
/// [`clear`]: PersistentStore::clear
/// [`entries`]: PersistentStore::entries
/// [`add`]: PersistentStore::add
/// [`increment`]: PersistentStore::increment
/// [`decrement`]: PersistentStore::decrement
pub trait PersistentStore: Send + Sync {
    /// Whether the store can serve requests at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Read a live entry.
    fn fetch(&self, key: &str) -> StrataResult<Option<CacheEntry>>;

    /// Unconditional upsert. `ttl_secs == 0` never expires.
    fn store(&self, key: &str, value: &CacheValue, ttl_secs: u64) -> StrataResult<()>;

    /// Store only if no live entry exists. Returns whether the value was written.
    fn add(&self, key: &str, value: &CacheValue, ttl_secs: u64) -> StrataResult<bool>;

    /// Remove an entry. Returns whether one existed.
    fn delete(&self, key: &str) -> StrataResult<bool>;

    /// Add `offset` to a live entry; `None` if absent. Non-numeric values
    /// count as 0. The entry keeps its TTL.
    fn increment(&self, key: &str, offset: i64) -> StrataResult<Option<i64>>;

    /// Subtract `offset` from a live entry; `None` if absent.
    fn decrement(&self, key: &str, offset: i64) -> StrataResult<Option<i64>>;

    /// Remove every entry.
    fn clear(&self) -> StrataResult<()>;

    /// Metadata of every stored entry, expired ones included.
    fn entries(&self) -> StrataResult<Vec<EntryMeta>>;

    /// Keys starting with `prefix`.
    fn keys_with_prefix(&self, prefix: &str) -> StrataResult<Vec<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|meta| meta.key.starts_with(prefix))
            .map(|meta| meta.key)
            .collect())
    }

    /// Current utilization of the store's capacity.
    fn memory_usage(&self) -> StrataResult<MemoryUsage>;
}

impl<S: PersistentStore + ?Sized> PersistentStore for Arc<S> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn fetch(&self, key: &str) -> StrataResult<Option<CacheEntry>> {
        (**self).fetch(key)
    }

    fn store(&self, key: &str, value: &CacheValue, ttl_secs: u64) -> StrataResult<()> {
        (**self).store(key, value, ttl_secs)
    }

    fn add(&self, key: &str, value: &CacheValue, ttl_secs: u64) -> StrataResult<bool> {
        (**self).add(key, value, ttl_secs)
    }

    fn delete(&self, key: &str) -> StrataResult<bool> {
        (**self).delete(key)
    }

    fn increment(&self, key: &str, offset: i64) -> StrataResult<Option<i64>> {
        (**self).increment(key, offset)
    }

    fn decrement(&self, key: &str, offset: i64) -> StrataResult<Option<i64>> {
        (**self).decrement(key, offset)
    }

    fn clear(&self) -> StrataResult<()> {
        (**self).clear()
    }

    fn entries(&self) -> StrataResult<Vec<EntryMeta>> {
        (**self).entries()
    }

    fn keys_with_prefix(&self, prefix: &str) -> StrataResult<Vec<String>> {
        (**self).keys_with_prefix(prefix)
    }

    fn memory_usage(&self) -> StrataResult<MemoryUsage> {
        (**self).memory_usage()
    }
}

/// Approximate stored size of a value.
pub(crate) fn value_size(value: &CacheValue) -> u64 {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
}
