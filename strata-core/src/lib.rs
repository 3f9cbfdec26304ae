//! STRATA Core - Cache Data Types
//!
//! Plain data structures shared by every STRATA crate: cached values and
//! entries, tenant identifiers, versioned key derivation, configuration,
//! errors and statistics. This crate performs no I/O.

pub mod config;
pub mod counter;
pub mod error;
pub mod features;
pub mod groups;
pub mod key;
pub mod stats;

pub use config::{StrataConfig, SweepConfig};
pub use counter::{apply_offset, clamp_offset, coerce_numeric};
pub use error::{ConfigError, StorageError, StrataError, StrataResult, ValidationError};
pub use features::{supports, Feature};
pub use groups::GroupSets;
pub use key::{
    installation_hash, normalize_group, validate_group, KeyDeriver, LogicalKey, PhysicalKey, VersionScope, MAX_VERSION,
};
pub use stats::{CacheStats, StatsCounter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Any serializable value the cache can hold.
///
/// Values cross the store boundary as owned JSON trees, so every read hands
/// the caller an independent copy and callers can never mutate cached state.
pub type CacheValue = serde_json::Value;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of a tenant ("site") in a multi-tenant deployment.
pub type TenantId = u64;

/// Tenant prefix used by global groups.
pub const GLOBAL_TENANT: TenantId = 0;

/// Tenant used when the deployment is not multi-tenant.
pub const SINGLE_TENANT: TenantId = 1;

/// Group used when a caller passes an empty group name.
pub const DEFAULT_GROUP: &str = "default";

// ============================================================================
// ENTRIES
// ============================================================================

/// A value held by one of the store tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fully derived key the entry is stored under
    pub physical_key: String,
    /// Stored value
    pub value: CacheValue,
    /// Time-to-live in seconds; 0 means the entry never expires
    pub ttl_secs: u64,
    /// When the entry was written
    pub created_at: Timestamp,
}

impl CacheEntry {
    pub fn new(physical_key: impl Into<String>, value: CacheValue, ttl_secs: u64) -> Self {
        Self {
            physical_key: physical_key.into(),
            value,
            ttl_secs,
            created_at: Utc::now(),
        }
    }

    /// Metadata view of this entry.
    pub fn meta(&self, size_bytes: u64) -> EntryMeta {
        EntryMeta {
            key: self.physical_key.clone(),
            ttl_secs: self.ttl_secs,
            created_at: self.created_at,
            size_bytes,
        }
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        is_expired(self.created_at, self.ttl_secs, now)
    }

    /// Instant the entry stops being readable; `None` if it never expires.
    pub fn expires_at(&self) -> Option<Timestamp> {
        expiry_deadline(self.created_at, self.ttl_secs)
    }
}

/// Entry metadata returned by store enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: String,
    pub ttl_secs: u64,
    pub created_at: Timestamp,
    pub size_bytes: u64,
}

impl EntryMeta {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        is_expired(self.created_at, self.ttl_secs, now)
    }

    /// Age of the entry at `now`; zero for entries stamped in the future.
    pub fn age_at(&self, now: Timestamp) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Whether an entry written at `created_at` with `ttl_secs` has expired.
pub fn is_expired(created_at: Timestamp, ttl_secs: u64, now: Timestamp) -> bool {
    match expiry_deadline(created_at, ttl_secs) {
        Some(deadline) => now >= deadline,
        None => false,
    }
}

/// `created_at + ttl_secs`; `None` for ttl 0 or an unrepresentable deadline.
pub fn expiry_deadline(created_at: Timestamp, ttl_secs: u64) -> Option<Timestamp> {
    if ttl_secs == 0 {
        return None;
    }
    i64::try_from(ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|ttl| created_at.checked_add_signed(ttl))
}

/// Memory utilization reported by a persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryUsage {
    /// Fraction of the store's capacity in use (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.total_bytes as f64
        }
    }
}
