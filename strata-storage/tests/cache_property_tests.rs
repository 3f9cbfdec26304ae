//! Property-Based Tests for the Object Cache
//!
//! Key derivation is pure, `add`/`replace` are duals, version bumps hide
//! every earlier entry, batch entries succeed independently and counters
//! clamp negative offsets.

use proptest::prelude::*;
use serde_json::json;
use strata_core::KeyDeriver;
use strata_test_utils::fixtures::{memory_cache, shared_caches};
use strata_test_utils::generators::{
    arb_cache_value, arb_group, arb_raw_key, arb_tenant_id, arb_ttl,
};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_derive_is_deterministic(
        raw in arb_raw_key(),
        group in arb_group(),
        tenant in arb_tenant_id(),
        tenant_version in 0u64..=100,
        group_version in 0u64..=100,
    ) {
        let deriver = KeyDeriver::new("wp", "0123456789abcdef0123456789abcdef");
        let first = deriver.derive(&raw, &group, tenant, tenant_version, group_version);
        let again = KeyDeriver::new("wp", "0123456789abcdef0123456789abcdef")
            .derive(&raw, &group, tenant, tenant_version, group_version);

        prop_assert!(first.is_ok());
        prop_assert_eq!(first.ok(), again.ok());
    }

    #[test]
    fn prop_set_then_get_returns_value(
        raw in arb_raw_key(),
        group in arb_group(),
        value in arb_cache_value(),
        ttl in arb_ttl(),
    ) {
        let mut cache = memory_cache();
        prop_assert!(cache.set(&raw, value.clone(), &group, ttl));
        prop_assert_eq!(cache.get(&raw, &group), Some(value));
    }

    #[test]
    fn prop_add_replace_duality(
        raw in arb_raw_key(),
        group in arb_group(),
        first in arb_cache_value(),
        second in arb_cache_value(),
    ) {
        let mut cache = memory_cache();

        prop_assert!(!cache.replace(&raw, second.clone(), &group, 0));
        prop_assert!(cache.add(&raw, first.clone(), &group, 0));
        prop_assert!(!cache.add(&raw, second.clone(), &group, 0));
        prop_assert_eq!(cache.get(&raw, &group), Some(first));

        prop_assert!(cache.replace(&raw, second.clone(), &group, 0));
        prop_assert_eq!(cache.get(&raw, &group), Some(second));
    }

    #[test]
    fn prop_group_flush_hides_old_entries(
        raw in arb_raw_key(),
        group in arb_group(),
        value in arb_cache_value(),
    ) {
        let (mut writer, mut reader, _store) = shared_caches();
        prop_assert!(writer.set(&raw, value.clone(), &group, 0));
        prop_assert_eq!(reader.get(&raw, &group), Some(value));

        prop_assert!(writer.flush_group(&group));
        prop_assert_eq!(writer.get(&raw, &group), None);

        // The reader's mirror still holds the old physical key; a fresh
        // version load is what hides it.
        let mut late = fresh_reader(&writer);
        prop_assert_eq!(late.get(&raw, &group), None);
    }

    #[test]
    fn prop_batch_entries_are_independent(
        existing in arb_raw_key(),
        fresh in arb_raw_key(),
        value in arb_cache_value(),
    ) {
        prop_assume!(existing != fresh);
        let mut cache = memory_cache();
        prop_assert!(cache.set(&existing, json!("old"), "posts", 0));

        let results = cache.add_multiple(
            [(existing.clone(), json!("new")), (fresh.clone(), value.clone())],
            "posts",
            0,
        );

        prop_assert_eq!(results.get(&existing), Some(&false));
        prop_assert_eq!(results.get(&fresh), Some(&true));
        prop_assert_eq!(cache.get(&existing, "posts"), Some(json!("old")));
        prop_assert_eq!(cache.get(&fresh, "posts"), Some(value));
    }

    #[test]
    fn prop_negative_offsets_leave_counters_unchanged(
        start in -1_000i64..1_000,
        offset in i64::MIN..0,
    ) {
        let mut cache = memory_cache();
        prop_assert_eq!(cache.incr("hits", offset, "counters"), None);

        prop_assert!(cache.set("hits", json!(start), "counters", 0));
        prop_assert_eq!(cache.incr("hits", offset, "counters"), Some(start));
        prop_assert_eq!(cache.decr("hits", offset, "counters"), Some(start));
        prop_assert_eq!(cache.get("hits", "counters"), Some(json!(start)));
    }
}

/// A second cache over the writer's store, built after the writer's flush.
fn fresh_reader(
    writer: &strata_storage::ObjectCache<strata_storage::SharedMemoryStore>,
) -> strata_storage::ObjectCache<strata_storage::SharedMemoryStore> {
    let store = writer
        .persistent_store()
        .cloned()
        .unwrap_or_else(|| panic!("writer has no persistent store"));
    strata_storage::ObjectCache::new(writer.config().clone(), store)
        .unwrap_or_else(|e| panic!("Failed to build reader: {}", e))
}
