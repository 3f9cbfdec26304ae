//! Configuration types

use crate::error::ConfigError;
use crate::key::installation_hash;
use crate::{StrataResult, TenantId, SINGLE_TENANT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default salt prepended to every physical key.
pub const DEFAULT_KEY_SALT: &str = "wp";

/// Default TTL applied when a caller passes `ttl <= 0` (6 hours).
pub const DEFAULT_TTL_SECS: u64 = 21_600;

/// Default LMDB map size in megabytes.
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 64;

/// Default interval between maintenance sweeps (hourly).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3_600;

/// Entries older than this are reclaimed regardless of TTL (24 hours).
pub const DEFAULT_STALE_AFTER_SECS: u64 = 86_400;

/// Store utilization above which the sweep flushes runtime state.
pub const DEFAULT_MEMORY_PRESSURE_THRESHOLD: f64 = 0.8;

// ============================================================================
// CACHE CONFIG
// ============================================================================

/// Object cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Salt prepended to every physical key
    pub key_salt: String,
    /// Keep a process-local mirror in front of the persistent store
    pub enable_local_mirror: bool,
    /// TTL substituted for `ttl <= 0` on writes
    pub default_ttl_secs: u64,
    /// Installation identity; hashed into every physical key
    pub installation_path: PathBuf,
    /// Whether tenant switching is honored
    pub multi_tenant: bool,
    /// Tenant selected at construction
    pub initial_tenant: TenantId,
    /// Directory of the LMDB environment backing the persistent tier
    pub lmdb_path: Option<PathBuf>,
    /// Maximum LMDB map size in megabytes
    pub lmdb_map_size_mb: usize,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            key_salt: DEFAULT_KEY_SALT.to_string(),
            enable_local_mirror: true,
            default_ttl_secs: DEFAULT_TTL_SECS,
            installation_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            multi_tenant: true,
            initial_tenant: SINGLE_TENANT,
            lmdb_path: None,
            lmdb_map_size_mb: DEFAULT_LMDB_MAP_SIZE_MB,
        }
    }
}

impl StrataConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `STRATA_KEY_SALT`: Key salt (default: "wp")
    /// - `STRATA_LOCAL_MIRROR`: Enable the local mirror (default: true)
    /// - `STRATA_DEFAULT_TTL_SECS`: Default TTL (default: 21600)
    /// - `STRATA_INSTALLATION_PATH`: Installation identity (default: working directory)
    /// - `STRATA_MULTI_TENANT`: Honor tenant switching (default: true)
    /// - `STRATA_TENANT_ID`: Initial tenant (default: 1)
    /// - `STRATA_LMDB_PATH`: LMDB directory (default: unset, no persistent tier)
    /// - `STRATA_LMDB_MAP_SIZE_MB`: LMDB map size (default: 64)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            key_salt: std::env::var("STRATA_KEY_SALT").unwrap_or(defaults.key_salt),
            enable_local_mirror: std::env::var("STRATA_LOCAL_MIRROR")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.enable_local_mirror),
            default_ttl_secs: std::env::var("STRATA_DEFAULT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_ttl_secs),
            installation_path: std::env::var("STRATA_INSTALLATION_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.installation_path),
            multi_tenant: std::env::var("STRATA_MULTI_TENANT")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.multi_tenant),
            initial_tenant: std::env::var("STRATA_TENANT_ID")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.initial_tenant),
            lmdb_path: std::env::var("STRATA_LMDB_PATH")
                .ok()
                .map(PathBuf::from)
                .or(defaults.lmdb_path),
            lmdb_map_size_mb: std::env::var("STRATA_LMDB_MAP_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.lmdb_map_size_mb),
        }
    }

    /// Set the key salt.
    pub fn with_key_salt(mut self, salt: impl Into<String>) -> Self {
        self.key_salt = salt.into();
        self
    }

    /// Enable or disable the local mirror.
    pub fn with_local_mirror(mut self, enabled: bool) -> Self {
        self.enable_local_mirror = enabled;
        self
    }

    /// Set the default TTL in seconds.
    pub fn with_default_ttl(mut self, secs: u64) -> Self {
        self.default_ttl_secs = secs;
        self
    }

    /// Set the installation path.
    pub fn with_installation_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.installation_path = path.into();
        self
    }

    /// Enable or disable tenant switching.
    pub fn with_multi_tenant(mut self, enabled: bool) -> Self {
        self.multi_tenant = enabled;
        self
    }

    /// Set the tenant selected at construction.
    pub fn with_initial_tenant(mut self, tenant: TenantId) -> Self {
        self.initial_tenant = tenant;
        self
    }

    /// Set the LMDB directory and map size.
    pub fn with_lmdb(mut self, path: impl Into<PathBuf>, map_size_mb: usize) -> Self {
        self.lmdb_path = Some(path.into());
        self.lmdb_map_size_mb = map_size_mb;
        self
    }

    /// Hash of the installation path used in every physical key.
    pub fn installation_hash(&self) -> String {
        installation_hash(&self.installation_path.to_string_lossy())
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - key_salt is non-empty and contains no ':' (the key field separator)
    /// - default_ttl_secs > 0
    /// - lmdb_map_size_mb > 0
    pub fn validate(&self) -> StrataResult<()> {
        if self.key_salt.is_empty() {
            return Err(ConfigError::invalid("key_salt", &self.key_salt, "key_salt must not be empty").into());
        }

        if self.key_salt.contains(':') {
            return Err(ConfigError::invalid(
                "key_salt",
                &self.key_salt,
                "key_salt must not contain ':'",
            )
            .into());
        }

        if self.default_ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "default_ttl_secs",
                self.default_ttl_secs,
                "default_ttl_secs must be greater than 0",
            )
            .into());
        }

        if self.lmdb_map_size_mb == 0 {
            return Err(ConfigError::invalid(
                "lmdb_map_size_mb",
                self.lmdb_map_size_mb,
                "lmdb_map_size_mb must be greater than 0",
            )
            .into());
        }

        Ok(())
    }
}

// ============================================================================
// SWEEP CONFIG
// ============================================================================

/// Configuration for the maintenance sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// How often the background task runs a sweep (default: 1 hour)
    pub interval: Duration,
    /// Age after which an entry is reclaimed regardless of TTL (default: 24 hours)
    pub stale_after: Duration,
    /// Utilization above which runtime state is flushed (default: 0.8)
    pub memory_pressure_threshold: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
            memory_pressure_threshold: DEFAULT_MEMORY_PRESSURE_THRESHOLD,
        }
    }
}

impl SweepConfig {
    /// Create SweepConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_SWEEP_INTERVAL_SECS`: Interval between sweeps (default: 3600)
    /// - `STRATA_SWEEP_STALE_AFTER_SECS`: Staleness ceiling (default: 86400)
    /// - `STRATA_SWEEP_PRESSURE_THRESHOLD`: Memory pressure threshold (default: 0.8)
    pub fn from_env() -> Self {
        let interval = Duration::from_secs(
            std::env::var("STRATA_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        );

        let stale_after = Duration::from_secs(
            std::env::var("STRATA_SWEEP_STALE_AFTER_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STALE_AFTER_SECS),
        );

        let memory_pressure_threshold = std::env::var("STRATA_SWEEP_PRESSURE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MEMORY_PRESSURE_THRESHOLD);

        Self {
            interval,
            stale_after,
            memory_pressure_threshold,
        }
    }

    /// Set the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the staleness ceiling.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Set the memory pressure threshold.
    pub fn with_pressure_threshold(mut self, threshold: f64) -> Self {
        self.memory_pressure_threshold = threshold;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StrataResult<()> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid(
                "interval",
                format!("{:?}", self.interval),
                "interval must be positive",
            )
            .into());
        }

        if self.stale_after.is_zero() {
            return Err(ConfigError::invalid(
                "stale_after",
                format!("{:?}", self.stale_after),
                "stale_after must be positive",
            )
            .into());
        }

        if !(self.memory_pressure_threshold > 0.0 && self.memory_pressure_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "memory_pressure_threshold",
                self.memory_pressure_threshold,
                "memory_pressure_threshold must be in (0.0, 1.0]",
            )
            .into());
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
