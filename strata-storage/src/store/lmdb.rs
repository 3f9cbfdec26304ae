//! LMDB-backed persistent store.
//!
//! Uses the heed crate (Rust bindings for LMDB). The environment is a
//! memory-mapped file, so several OS processes opening the same directory
//! share one store, and every single-key operation below runs inside one
//! write transaction.
//!
//! # Entry Format
//!
//! `[created_at millis: i64 LE][ttl_secs: u64 LE][json value]`
//!
//! # Long Keys
//!
//! LMDB rejects keys above 511 bytes. Longer keys are stored as
//! their leading bytes followed by `#` and the SHA-256 of the whole key, so
//! prefix scans by tenant and group still find them.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use sha2::{Digest, Sha256};
use strata_core::{
    apply_offset, is_expired, CacheEntry, CacheValue, EntryMeta, MemoryUsage, StorageError,
    StrataError, StrataResult, Timestamp,
};

use super::PersistentStore;

const HEADER_LEN: usize = 16;

/// LMDB's compiled-in key limit (`MDB_MAXKEYSIZE`).
const MAX_KEY_LEN: usize = 511;

/// `#` plus a hex SHA-256 digest.
const DIGEST_SUFFIX_LEN: usize = 1 + 64;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes could not be decoded.
    #[error("Deserialization error for {key}: {reason}")]
    Deserialization { key: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LmdbStoreError {
    fn transaction(e: heed::Error) -> Self {
        LmdbStoreError::Transaction(e.to_string())
    }
}

/// Convert LmdbStoreError to StrataError.
impl From<LmdbStoreError> for StrataError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Serialization(reason) => {
                StrataError::Storage(StorageError::Serialization { reason })
            }
            LmdbStoreError::Deserialization { key, reason } => {
                StrataError::Storage(StorageError::Deserialization { key, reason })
            }
            other => StrataError::Storage(StorageError::backend("lmdb", other)),
        }
    }
}

/// Persistent store over a single unnamed LMDB database.
///
/// # Example
///
/// ```ignore
/// use strata_storage::{LmdbStore, PersistentStore};
///
/// let store = LmdbStore::new("/var/cache/strata", 64)?;
/// store.store("key", &serde_json::json!("value"), 60)?;
/// ```
pub struct LmdbStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    path: PathBuf,
    map_size_bytes: u64,
}

impl LmdbStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let map_size = max_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbStoreError::EnvOpen(format!("map size of {} MB overflows", max_size_mb))
        })?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(LmdbStoreError::transaction)?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(LmdbStoreError::transaction)?;

        Ok(Self {
            env,
            db,
            path: path.as_ref().to_path_buf(),
            map_size_bytes: map_size as u64,
        })
    }

    /// Directory holding the LMDB files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::transaction)?;
        self.db.len(&rtxn).map_err(LmdbStoreError::transaction)
    }

    pub fn is_empty(&self) -> Result<bool, LmdbStoreError> {
        Ok(self.len()? == 0)
    }

    /// Write an entry with an explicit creation time.
    pub fn store_at(
        &self,
        key: &str,
        value: &CacheValue,
        ttl_secs: u64,
        created_at: Timestamp,
    ) -> Result<(), LmdbStoreError> {
        let bytes = encode_entry(value, ttl_secs, created_at)?;
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::transaction)?;
        self.db
            .put(&mut wtxn, storage_key(key).as_bytes(), &bytes)
            .map_err(LmdbStoreError::transaction)?;
        wtxn.commit().map_err(LmdbStoreError::transaction)
    }

    fn read_entry(&self, txn: &RoTxn, key: &str) -> Result<Option<CacheEntry>, LmdbStoreError> {
        match self
            .db
            .get(txn, storage_key(key).as_bytes())
            .map_err(LmdbStoreError::transaction)?
        {
            Some(bytes) => decode_entry(key, bytes).map(Some),
            None => Ok(None),
        }
    }

    fn try_fetch(&self, key: &str) -> Result<Option<CacheEntry>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::transaction)?;
        let entry = self.read_entry(&rtxn, key)?;
        Ok(entry.filter(|entry| !entry.is_expired_at(Utc::now())))
    }

    fn try_add(&self, key: &str, value: &CacheValue, ttl_secs: u64) -> Result<bool, LmdbStoreError> {
        let now = Utc::now();
        let stored_key = storage_key(key);
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::transaction)?;

        let live = match self
            .db
            .get(&wtxn, stored_key.as_bytes())
            .map_err(LmdbStoreError::transaction)?
        {
            Some(bytes) => match decode_header(bytes) {
                Some((created_at, ttl)) => !is_expired(created_at, ttl, now),
                None => false,
            },
            None => false,
        };
        if live {
            return Ok(false);
        }

        let bytes = encode_entry(value, ttl_secs, now)?;
        self.db
            .put(&mut wtxn, stored_key.as_bytes(), &bytes)
            .map_err(LmdbStoreError::transaction)?;
        wtxn.commit().map_err(LmdbStoreError::transaction)?;
        Ok(true)
    }

    fn try_adjust(
        &self,
        key: &str,
        offset: i64,
        increment: bool,
    ) -> Result<Option<i64>, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::transaction)?;

        let entry = match self.read_entry(&wtxn, key)? {
            Some(entry) if !entry.is_expired_at(Utc::now()) => entry,
            _ => return Ok(None),
        };

        let next = apply_offset(&entry.value, offset, increment);
        let bytes = encode_entry(&CacheValue::from(next), entry.ttl_secs, entry.created_at)?;
        self.db
            .put(&mut wtxn, storage_key(key).as_bytes(), &bytes)
            .map_err(LmdbStoreError::transaction)?;
        wtxn.commit().map_err(LmdbStoreError::transaction)?;
        Ok(Some(next))
    }

    fn try_delete(&self, key: &str) -> Result<bool, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::transaction)?;
        let deleted = self
            .db
            .delete(&mut wtxn, storage_key(key).as_bytes())
            .map_err(LmdbStoreError::transaction)?;
        wtxn.commit().map_err(LmdbStoreError::transaction)?;
        Ok(deleted)
    }

    fn try_clear(&self) -> Result<(), LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::transaction)?;
        self.db
            .clear(&mut wtxn)
            .map_err(LmdbStoreError::transaction)?;
        wtxn.commit().map_err(LmdbStoreError::transaction)
    }

    fn try_entries(&self) -> Result<Vec<EntryMeta>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::transaction)?;

        let mut entries = Vec::new();
        let iter = self.db.iter(&rtxn).map_err(LmdbStoreError::transaction)?;

        for result in iter {
            let Ok((key, bytes)) = result else {
                continue;
            };
            let Ok(key) = std::str::from_utf8(key) else {
                continue;
            };
            let Some((created_at, ttl_secs)) = decode_header(bytes) else {
                continue;
            };
            entries.push(EntryMeta {
                key: key.to_string(),
                ttl_secs,
                created_at,
                size_bytes: bytes.len() as u64,
            });
        }

        Ok(entries)
    }

    /// Collect the keys starting with `prefix`, seeking straight to the
    /// first match.
    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<String>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::transaction)?;

        let mut keys = Vec::new();
        let iter = self
            .db
            .prefix_iter(&rtxn, prefix)
            .map_err(LmdbStoreError::transaction)?;

        for result in iter {
            match result {
                Ok((key, _)) => {
                    if let Ok(key) = std::str::from_utf8(key) {
                        keys.push(key.to_string());
                    }
                }
                Err(_) => continue,
            }
        }

        Ok(keys)
    }

    fn try_memory_usage(&self) -> Result<MemoryUsage, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::transaction)?;
        let stat = self.db.stat(&rtxn).map_err(LmdbStoreError::transaction)?;
        let pages = stat.branch_pages + stat.leaf_pages + stat.overflow_pages;
        Ok(MemoryUsage {
            used_bytes: stat.page_size as u64 * pages as u64,
            total_bytes: self.map_size_bytes,
        })
    }
}

impl PersistentStore for LmdbStore {
    fn fetch(&self, key: &str) -> StrataResult<Option<CacheEntry>> {
        Ok(self.try_fetch(key)?)
    }

    fn store(&self, key: &str, value: &CacheValue, ttl_secs: u64) -> StrataResult<()> {
        Ok(self.store_at(key, value, ttl_secs, Utc::now())?)
    }

    fn add(&self, key: &str, value: &CacheValue, ttl_secs: u64) -> StrataResult<bool> {
        Ok(self.try_add(key, value, ttl_secs)?)
    }

    fn delete(&self, key: &str) -> StrataResult<bool> {
        Ok(self.try_delete(key)?)
    }

    fn increment(&self, key: &str, offset: i64) -> StrataResult<Option<i64>> {
        Ok(self.try_adjust(key, offset, true)?)
    }

    fn decrement(&self, key: &str, offset: i64) -> StrataResult<Option<i64>> {
        Ok(self.try_adjust(key, offset, false)?)
    }

    fn clear(&self) -> StrataResult<()> {
        Ok(self.try_clear()?)
    }

    fn entries(&self) -> StrataResult<Vec<EntryMeta>> {
        Ok(self.try_entries()?)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StrataResult<Vec<String>> {
        Ok(self.collect_keys_with_prefix(prefix.as_bytes())?)
    }

    fn memory_usage(&self) -> StrataResult<MemoryUsage> {
        Ok(self.try_memory_usage()?)
    }
}

/// The key LMDB actually stores for `key`. Keys within `MAX_KEY_LEN` are
/// used as-is; longer ones keep as much of their prefix as fits.
fn storage_key(key: &str) -> Cow<'_, str> {
    if key.len() <= MAX_KEY_LEN {
        return Cow::Borrowed(key);
    }

    let mut keep = MAX_KEY_LEN - DIGEST_SUFFIX_LEN;
    while !key.is_char_boundary(keep) {
        keep -= 1;
    }
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    Cow::Owned(format!("{}#{}", &key[..keep], digest))
}

fn encode_entry(
    value: &CacheValue,
    ttl_secs: u64,
    created_at: Timestamp,
) -> Result<Vec<u8>, LmdbStoreError> {
    let value_bytes =
        serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + value_bytes.len());
    bytes.extend_from_slice(&created_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&ttl_secs.to_le_bytes());
    bytes.extend_from_slice(&value_bytes);
    Ok(bytes)
}

fn decode_header(bytes: &[u8]) -> Option<(Timestamp, u64)> {
    let created: [u8; 8] = bytes.get(0..8)?.try_into().ok()?;
    let ttl: [u8; 8] = bytes.get(8..HEADER_LEN)?.try_into().ok()?;
    let created_at = DateTime::from_timestamp_millis(i64::from_le_bytes(created))?;
    Some((created_at, u64::from_le_bytes(ttl)))
}

fn decode_entry(key: &str, bytes: &[u8]) -> Result<CacheEntry, LmdbStoreError> {
    let (created_at, ttl_secs) =
        decode_header(bytes).ok_or_else(|| LmdbStoreError::Deserialization {
            key: key.to_string(),
            reason: "Invalid entry header".to_string(),
        })?;

    let value: CacheValue = serde_json::from_slice(&bytes[HEADER_LEN..]).map_err(|e| {
        LmdbStoreError::Deserialization {
            key: key.to_string(),
            reason: e.to_string(),
        }
    })?;

    Ok(CacheEntry {
        physical_key: key.to_string(),
        value,
        ttl_secs,
        created_at,
    })
}
