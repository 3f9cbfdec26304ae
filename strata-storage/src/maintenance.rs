//! Maintenance Sweep
//!
//! Version bumps orphan entries instead of deleting them, so the persistent
//! store slowly fills with keys nothing will ever read again. The sweep
//! reclaims them:
//!
//! - entries whose TTL has elapsed
//! - entries older than `stale_after` (24 hours by default), whatever their TTL
//!
//! and flushes runtime state when store utilization crosses the configured
//! threshold. Version counters are never swept.
//!
//! A sweep is idempotent and never fails; per-entry errors are logged and
//! skipped. [`maintenance_task`] runs it on an interval until shut down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use strata_core::{StrataResult, SweepConfig, Timestamp};
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};

use crate::object_cache::ObjectCache;
use crate::store::PersistentStore;

// ============================================================================
// REPORT
// ============================================================================

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Data entries inspected (version counters excluded)
    pub examined: u64,
    /// Entries removed because their TTL elapsed
    pub expired: u64,
    /// Entries removed because they outlived `stale_after`
    pub stale: u64,
    /// Enumeration, deletion or utilization queries that failed
    pub failed: u64,
    /// Store utilization after reclamation, if it could be read
    pub utilization: Option<f64>,
    /// Whether runtime state was flushed under memory pressure
    pub pressure_flush: bool,
}

impl SweepReport {
    /// Total entries removed.
    pub fn reclaimed(&self) -> u64 {
        self.expired + self.stale
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters accumulated by the background task.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Total sweeps completed
    pub cycles: AtomicU64,
    /// Total entries reclaimed since startup
    pub reclaimed: AtomicU64,
    /// Total memory-pressure flushes
    pub pressure_flushes: AtomicU64,
    /// Total failed operations
    pub errors: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: &SweepReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.reclaimed
            .fetch_add(report.reclaimed(), Ordering::Relaxed);
        self.errors.fetch_add(report.failed, Ordering::Relaxed);
        if report.pressure_flush {
            self.pressure_flushes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            pressure_flushes: self.pressure_flushes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweep metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSnapshot {
    pub cycles: u64,
    pub reclaimed: u64,
    pub pressure_flushes: u64,
    pub errors: u64,
}

// ============================================================================
// SWEEPER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MaintenanceSweeper {
    config: SweepConfig,
}

impl MaintenanceSweeper {
    /// Build a sweeper, rejecting a config the background task cannot run
    /// (a zero interval would panic the ticker).
    pub fn new(config: SweepConfig) -> StrataResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run one sweep and return the number of entries reclaimed.
    pub fn sweep<S: PersistentStore>(&self, cache: &mut ObjectCache<S>) -> u64 {
        self.sweep_with_report(cache).reclaimed()
    }

    pub fn sweep_with_report<S: PersistentStore>(&self, cache: &mut ObjectCache<S>) -> SweepReport {
        self.sweep_at(cache, Utc::now())
    }

    /// Run one sweep judging expiry and staleness at `now`.
    pub fn sweep_at<S: PersistentStore>(
        &self,
        cache: &mut ObjectCache<S>,
        now: Timestamp,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        let Some(store) = cache.persistent_store().cloned() else {
            tracing::trace!("No persistent store, skipping cache sweep");
            return report;
        };
        let deriver = cache.key_deriver().clone();

        let entries = match store.entries() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to enumerate cache entries");
                report.failed += 1;
                Vec::new()
            }
        };

        for meta in entries {
            if deriver.is_version_key(&meta.key) {
                continue;
            }
            report.examined += 1;

            let expired = meta.is_expired_at(now);
            let stale = !expired && meta.age_at(now) > self.config.stale_after;
            if !expired && !stale {
                continue;
            }

            match store.delete(&meta.key) {
                Ok(true) if expired => report.expired += 1,
                Ok(true) => report.stale += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(error = %e, key = %meta.key, "Failed to reclaim cache entry");
                    report.failed += 1;
                }
            }
        }

        match store.memory_usage() {
            Ok(usage) => {
                let utilization = usage.utilization();
                report.utilization = Some(utilization);
                if utilization > self.config.memory_pressure_threshold {
                    tracing::warn!(
                        utilization,
                        threshold = self.config.memory_pressure_threshold,
                        "Cache memory pressure, flushing runtime cache"
                    );
                    cache.flush_runtime();
                    report.pressure_flush = true;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read cache memory usage");
                report.failed += 1;
            }
        }

        if report.reclaimed() > 0 || report.pressure_flush {
            tracing::info!(
                expired = report.expired,
                stale = report.stale,
                pressure_flush = report.pressure_flush,
                "Cache sweep completed"
            );
        } else {
            tracing::trace!(examined = report.examined, "Cache sweep completed with nothing to reclaim");
        }

        report
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that sweeps `cache` every `sweeper.config().interval`.
///
/// Runs until the shutdown signal is received and returns the metrics
/// collected over its lifetime.
///
/// # Example
///
/// ```ignore
/// use tokio::sync::{watch, Mutex};
/// use std::sync::Arc;
///
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let cache = Arc::new(Mutex::new(ObjectCache::open(StrataConfig::from_env())?));
///
/// let handle = tokio::spawn(maintenance_task(
///     Arc::clone(&cache),
///     MaintenanceSweeper::new(SweepConfig::from_env())?,
///     shutdown_rx,
/// ));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn maintenance_task<S>(
    cache: Arc<Mutex<ObjectCache<S>>>,
    sweeper: MaintenanceSweeper,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics>
where
    S: PersistentStore + 'static,
{
    let metrics = Arc::new(SweepMetrics::new());

    let mut sweep_interval = interval(sweeper.config().interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = sweeper.config().interval.as_secs(),
        stale_after_secs = sweeper.config().stale_after.as_secs(),
        "Cache maintenance task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Cache maintenance task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                let mut cache = cache.lock().await;
                let report = sweeper.sweep_with_report(&mut cache);
                metrics.record(&report);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        reclaimed = snapshot.reclaimed,
        pressure_flushes = snapshot.pressure_flushes,
        errors = snapshot.errors,
        "Cache maintenance task completed"
    );

    metrics
}
