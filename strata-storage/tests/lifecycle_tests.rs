//! Cache Lifecycle Tests
//!
//! Each scenario runs over both persistent stores: the in-process shared
//! store and a real LMDB environment.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use strata_core::{CacheValue, StrataConfig, SweepConfig, Timestamp};
use strata_storage::{
    maintenance_task, EntityChange, InvalidationRegistry, LmdbStore, MaintenanceSweeper,
    ObjectCache, PersistentStore, SharedMemoryStore,
};
use strata_test_utils::assertions::{assert_absent, assert_config_error};
use strata_test_utils::fixtures::{
    lmdb_cache, lmdb_cache_with, memory_cache, memory_cache_with, stored_keys, test_config,
};
use tokio::sync::{watch, Mutex};

/// Show cache logs with `RUST_LOG=strata_storage=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn seconds_ago(secs: i64) -> Timestamp {
    Utc::now() - chrono::Duration::seconds(secs)
}

fn backdate_shared(cache: &ObjectCache<SharedMemoryStore>, key: &str, value: &CacheValue, ttl: u64) {
    let store = cache.persistent_store().expect("persistent store");
    store.store_at(key, value, ttl, seconds_ago(2)).unwrap();
}

fn backdate_lmdb(cache: &ObjectCache<LmdbStore>, key: &str, value: &CacheValue, ttl: u64) {
    let store = cache.persistent_store().expect("persistent store");
    store.store_at(key, value, ttl, seconds_ago(2)).unwrap();
}

fn unmirrored() -> StrataConfig {
    test_config().with_local_mirror(false)
}

// ============================================================================
// SCENARIOS
// ============================================================================

fn tenant_isolation<S: PersistentStore>(cache: &mut ObjectCache<S>) {
    cache.add_global_groups(["users"]);

    assert!(cache.set("front", json!("tenant one"), "posts", 0));
    assert!(cache.set("admin", json!({"id": 1}), "users", 0));

    cache.switch_tenant(2);
    assert_absent(cache, "front", "posts");
    assert_eq!(cache.get("admin", "users"), Some(json!({"id": 1})));

    assert!(cache.set("front", json!("tenant two"), "posts", 0));
    cache.switch_tenant(1);
    assert_eq!(cache.get("front", "posts"), Some(json!("tenant one")));
}

fn version_bump_invalidation<S: PersistentStore>(cache: &mut ObjectCache<S>) {
    assert!(cache.set("k", json!("v1"), "posts", 0));
    assert!(cache.flush_groups(["posts"]));

    assert_absent(cache, "k", "posts");
    // Orphaned until reclaimed.
    assert_eq!(stored_keys(cache, "posts").len(), 1);
}

fn wraparound<S: PersistentStore>(cache: &mut ObjectCache<S>) {
    cache.flush_group("posts");
    assert_eq!(cache.group_version("posts"), 1);
    assert!(cache.set("k", json!("before"), "posts", 0));

    for _ in 0..99 {
        cache.flush_group("posts");
    }
    assert_eq!(cache.group_version("posts"), 100);

    cache.flush_group("posts");
    assert_eq!(cache.group_version("posts"), 1);
    assert_absent(cache, "k", "posts");
    assert!(stored_keys(cache, "posts").is_empty());
}

fn tenant_flush<S: PersistentStore>(cache: &mut ObjectCache<S>) {
    cache.add_global_groups(["users"]);
    assert!(cache.set("p", json!(1), "posts", 0));
    assert!(cache.set("u", json!(1), "users", 0));

    assert!(cache.flush_sites([1]));
    assert_absent(cache, "p", "posts");
    assert_absent(cache, "u", "users");
    assert_eq!(cache.tenant_version(0), 1);
}

fn content_invalidation<S: PersistentStore>(cache: &mut ObjectCache<S>) {
    let registry = InvalidationRegistry::content_defaults();
    cache.set("7", json!({"title": "Hello"}), "posts", 0);
    cache.set("7", json!({"views": 3}), "post_meta", 0);
    cache.set("menu", json!([7]), "nav_menu", 0);

    let ran = registry.dispatch(
        cache,
        "post.saved",
        &EntityChange::Post {
            id: 7,
            post_type: Some("nav_menu_item".to_string()),
        },
    );

    assert_eq!(ran, 1);
    assert_absent(cache, "7", "posts");
    assert_absent(cache, "7", "post_meta");
    assert_absent(cache, "menu", "nav_menu");
}

// ============================================================================
// SHARED MEMORY STORE
// ============================================================================

#[test]
fn test_tenant_isolation_shared() {
    tenant_isolation(&mut memory_cache());
}

#[test]
fn test_version_bump_invalidation_shared() {
    version_bump_invalidation(&mut memory_cache());
}

#[test]
fn test_wraparound_shared() {
    init_tracing();
    wraparound(&mut memory_cache());
}

#[test]
fn test_tenant_flush_shared() {
    tenant_flush(&mut memory_cache());
}

#[test]
fn test_content_invalidation_shared() {
    content_invalidation(&mut memory_cache());
}

#[test]
fn test_sweep_reclamation_shared() {
    let mut cache = memory_cache_with(unmirrored());
    assert!(cache.set("session", json!("token"), "sessions", 1));

    let keys = stored_keys(&cache, "sessions");
    assert_eq!(keys.len(), 1);
    backdate_shared(&cache, &keys[0], &json!("token"), 1);

    assert_absent(&mut cache, "session", "sessions");
    assert_eq!(stored_keys(&cache, "sessions").len(), 1);

    assert_eq!(MaintenanceSweeper::default().sweep(&mut cache), 1);
    assert!(stored_keys(&cache, "sessions").is_empty());
}

#[test]
fn test_short_ttl_expires_in_real_time() {
    let mut cache = memory_cache();
    assert!(cache.set("session", json!("token"), "sessions", 1));
    assert_eq!(cache.get("session", "sessions"), Some(json!("token")));

    std::thread::sleep(Duration::from_millis(1_100));

    assert_absent(&mut cache, "session", "sessions");
    assert_eq!(MaintenanceSweeper::default().sweep(&mut cache), 1);
}

// ============================================================================
// LMDB STORE
// ============================================================================

#[test]
fn test_tenant_isolation_lmdb() {
    let (mut cache, _dir) = lmdb_cache();
    tenant_isolation(&mut cache);
}

#[test]
fn test_version_bump_invalidation_lmdb() {
    let (mut cache, _dir) = lmdb_cache();
    version_bump_invalidation(&mut cache);
}

#[test]
fn test_wraparound_lmdb() {
    init_tracing();
    let (mut cache, _dir) = lmdb_cache();
    wraparound(&mut cache);
}

#[test]
fn test_tenant_flush_lmdb() {
    let (mut cache, _dir) = lmdb_cache();
    tenant_flush(&mut cache);
}

#[test]
fn test_content_invalidation_lmdb() {
    let (mut cache, _dir) = lmdb_cache();
    content_invalidation(&mut cache);
}

#[test]
fn test_sweep_reclamation_lmdb() {
    let (mut cache, _dir) = lmdb_cache_with(unmirrored());
    assert!(cache.set("session", json!("token"), "sessions", 1));

    let keys = stored_keys(&cache, "sessions");
    assert_eq!(keys.len(), 1);
    backdate_lmdb(&cache, &keys[0], &json!("token"), 1);

    assert_absent(&mut cache, "session", "sessions");
    assert_eq!(MaintenanceSweeper::default().sweep(&mut cache), 1);
    assert!(stored_keys(&cache, "sessions").is_empty());
}

#[test]
fn test_lmdb_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config().with_lmdb(dir.path(), 16);

    {
        let mut cache = ObjectCache::open(config.clone()).unwrap();
        cache.flush_group("options");
        assert!(cache.set("siteurl", json!("https://example.org"), "options", 0));
    }

    let mut reopened = ObjectCache::open(config).unwrap();
    assert_eq!(reopened.group_version("options"), 1);
    assert_eq!(
        reopened.get("siteurl", "options"),
        Some(json!("https://example.org"))
    );
}

#[test]
fn test_missing_lmdb_path_degrades() {
    let mut cache = ObjectCache::open(test_config()).unwrap();
    assert!(!cache.is_persistent_available());
    assert!(cache.set("k", json!(1), "posts", 0));
    assert_eq!(cache.get("k", "posts"), Some(json!(1)));
}

#[test]
fn test_zero_sweep_interval_is_rejected() {
    let sweeper = MaintenanceSweeper::new(SweepConfig::default().with_interval(Duration::ZERO));
    assert_config_error(&sweeper.map(|_| ()));
}

#[test]
fn test_long_raw_key_lmdb() {
    let (mut cache, _dir) = lmdb_cache_with(unmirrored());
    let raw = "k".repeat(600);

    assert!(cache.set(&raw, json!(1), "posts", 0));
    assert_eq!(cache.get(&raw, "posts"), Some(json!(1)));
    assert_eq!(stored_keys(&cache, "posts").len(), 1);

    assert!(cache.delete(&raw, "posts"));
    assert_absent(&mut cache, &raw, "posts");
}

#[test]
fn test_group_separator_cannot_alias_keys_lmdb() {
    let (mut cache, _dir) = lmdb_cache();
    assert!(cache.set("b:c", json!("secret"), "a", 0));
    assert_absent(&mut cache, "c", "a:b");
    assert!(!cache.set("c", json!("other"), "a:b", 0));
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = ObjectCache::new(
        test_config().with_key_salt("a:b"),
        Arc::new(SharedMemoryStore::new()),
    );
    assert_config_error(&result.map(|_| ()));
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

#[tokio::test]
async fn test_maintenance_task_over_lmdb() {
    init_tracing();
    let (cache, _dir) = lmdb_cache_with(unmirrored());
    let cache = Arc::new(Mutex::new(cache));

    {
        let mut guard = cache.lock().await;
        assert!(guard.set("stale", json!(1), "sessions", 1));
        let keys = stored_keys(&guard, "sessions");
        backdate_lmdb(&guard, &keys[0], &json!(1), 1);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper =
        MaintenanceSweeper::new(SweepConfig::default().with_interval(Duration::from_millis(10)))
            .unwrap();
    let handle = tokio::spawn(maintenance_task(Arc::clone(&cache), sweeper, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    let metrics = handle.await.unwrap();

    assert_eq!(metrics.snapshot().reclaimed, 1);
    assert!(stored_keys(&*cache.lock().await, "sessions").is_empty());
}
