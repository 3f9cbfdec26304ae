//! STRATA Test Utilities
//!
//! Shared test infrastructure for the STRATA workspace:
//! - Proptest generators for keys, groups, tenants and values
//! - Cache fixtures over the shared-memory and LMDB stores
//! - Assertions for STRATA-specific results

pub use strata_core::{
    CacheValue, KeyDeriver, StrataConfig, StrataError, StrataResult, SweepConfig, TenantId,
    Timestamp, MAX_VERSION,
};
pub use strata_storage::{
    LmdbStore, MaintenanceSweeper, ObjectCache, PersistentStore, SharedMemoryStore,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache inputs.

    use super::*;
    use proptest::prelude::*;

    /// Generate a non-empty raw key, colons included.
    pub fn arb_raw_key() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_:.-]{1,32}"
    }

    /// Generate a group name, empty (default group) included.
    pub fn arb_group() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            Just("posts".to_string()),
            Just("options".to_string()),
            "[a-z_]{1,16}",
        ]
    }

    /// Generate a tenant id. 0 is reserved for global groups.
    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        1u64..10_000
    }

    /// Generate a JSON value with bounded nesting.
    pub fn arb_cache_value() -> impl Strategy<Value = CacheValue> {
        let leaf = prop_oneof![
            Just(CacheValue::Null),
            any::<bool>().prop_map(CacheValue::from),
            any::<i64>().prop_map(CacheValue::from),
            "[ -~]{0,32}".prop_map(CacheValue::from),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(CacheValue::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..4).prop_map(|map| {
                    CacheValue::Object(map.into_iter().collect())
                }),
            ]
        })
    }

    /// Generate a write TTL; zero and negatives mean "use the default".
    pub fn arb_ttl() -> impl Strategy<Value = i64> {
        prop_oneof![Just(0i64), Just(-1i64), 1i64..86_400]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built caches for common testing scenarios.

    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Multi-tenant config with a fixed installation identity.
    pub fn test_config() -> StrataConfig {
        StrataConfig::default().with_installation_path("/srv/strata-test")
    }

    /// Cache over a private shared-memory store.
    pub fn memory_cache() -> ObjectCache<SharedMemoryStore> {
        memory_cache_with(test_config())
    }

    pub fn memory_cache_with(config: StrataConfig) -> ObjectCache<SharedMemoryStore> {
        ObjectCache::new(config, Arc::new(SharedMemoryStore::new()))
            .unwrap_or_else(|e| panic!("Failed to build memory cache: {}", e))
    }

    /// Two caches over one store, standing in for two processes.
    pub fn shared_caches() -> (
        ObjectCache<SharedMemoryStore>,
        ObjectCache<SharedMemoryStore>,
        SharedMemoryStore,
    ) {
        let store = SharedMemoryStore::new();
        let first = ObjectCache::new(test_config(), Arc::new(store.clone()))
            .unwrap_or_else(|e| panic!("Failed to build cache: {}", e));
        let second = ObjectCache::new(test_config(), Arc::new(store.clone()))
            .unwrap_or_else(|e| panic!("Failed to build cache: {}", e));
        (first, second, store)
    }

    /// Cache over a fresh LMDB environment. Keep the directory alive for the
    /// lifetime of the cache.
    pub fn lmdb_cache() -> (ObjectCache<LmdbStore>, TempDir) {
        lmdb_cache_with(test_config())
    }

    pub fn lmdb_cache_with(config: StrataConfig) -> (ObjectCache<LmdbStore>, TempDir) {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("Failed to create temp dir: {}", e));
        let cache = ObjectCache::open(config.with_lmdb(dir.path(), 16))
            .unwrap_or_else(|e| panic!("Failed to open LMDB cache: {}", e));
        assert!(cache.is_persistent_available(), "LMDB store did not open");
        (cache, dir)
    }

    /// Physical keys currently stored under `group` for the cache's tenant.
    pub fn stored_keys<S: PersistentStore>(cache: &ObjectCache<S>, group: &str) -> Vec<String> {
        let Some(store) = cache.persistent_store() else {
            return Vec::new();
        };
        let prefix = cache
            .key_deriver()
            .group_prefix(cache.current_tenant(), group);
        store
            .keys_with_prefix(&prefix)
            .unwrap_or_else(|e| panic!("Failed to list keys: {}", e))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for STRATA results.

    use super::*;

    /// Assert that a StrataResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a StrataResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that `key` in `group` is not readable through `cache`.
    #[track_caller]
    pub fn assert_absent<S: PersistentStore>(cache: &mut ObjectCache<S>, key: &str, group: &str) {
        if let Some(value) = cache.get(key, group) {
            panic!("Expected {}/{} to be absent, found {}", group, key, value);
        }
    }
}
