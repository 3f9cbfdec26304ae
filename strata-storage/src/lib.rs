//! STRATA Storage - Tiered Object Cache
//!
//! The storage half of STRATA: the persistent store contract and its LMDB and
//! shared-memory implementations, the process-local mirror and
//! non-persistent tiers, generational version counters, the
//! [`ObjectCache`] facade, content invalidation hooks and the background
//! maintenance sweep.

pub mod invalidation;
pub mod maintenance;
pub mod object_cache;
pub mod store;
pub mod versions;

pub use invalidation::{EntityChange, InvalidationRegistry};
pub use maintenance::{maintenance_task, MaintenanceSweeper, SweepMetrics, SweepReport, SweepSnapshot};
pub use object_cache::ObjectCache;
pub use store::{
    LmdbStore, LmdbStoreError, LocalMirror, NonPersistentStore, PersistentStore, SharedMemoryStore,
};
pub use versions::{VersionStore, VersionTier};
