//! Region statistics
//!
//! Lock-free counters updated by the coordinator after each destroy.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::destroy::Outcome;
use crate::error::DestroyError;

/// Atomic counters for one region
#[derive(Debug, Default)]
pub struct RegionStats {
    removed: AtomicU64,
    tombstoned: AtomicU64,
    replays: AtomicU64,
    evictions_suppressed: AtomicU64,
    not_found: AtomicU64,
    conditional_mismatches: AtomicU64,
    version_conflicts: AtomicU64,
    retries: AtomicU64,
    tombstones_expired: AtomicU64,
    log_failures: AtomicU64,
    clears: AtomicU64,
}

/// Plain copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub removed: u64,
    pub tombstoned: u64,
    pub replays: u64,
    pub evictions_suppressed: u64,
    pub not_found: u64,
    pub conditional_mismatches: u64,
    pub version_conflicts: u64,
    pub retries: u64,
    pub tombstones_expired: u64,
    pub log_failures: u64,
    pub clears: u64,
}

impl RegionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the terminal result of one destroy
    pub fn record_destroy(&self, result: &Result<Outcome, DestroyError>) {
        let counter = match result {
            Ok(Outcome::Removed) => &self.removed,
            Ok(Outcome::Tombstoned) => &self.tombstoned,
            Ok(Outcome::Replay) => &self.replays,
            Ok(Outcome::Suppressed(_)) => &self.evictions_suppressed,
            Err(DestroyError::NotFound) => &self.not_found,
            Err(DestroyError::ConditionalMismatch) => &self.conditional_mismatches,
            Err(DestroyError::VersionConflict { .. }) => &self.version_conflicts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// A suppressed mutation that still propagated a timestamp update
    pub fn record_conflict(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: usize) {
        self.tombstones_expired
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_log_failure(&self) {
        self.log_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            removed: self.removed.load(Ordering::Relaxed),
            tombstoned: self.tombstoned.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            evictions_suppressed: self.evictions_suppressed.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            conditional_mismatches: self.conditional_mismatches.load(Ordering::Relaxed),
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            tombstones_expired: self.tombstones_expired.load(Ordering::Relaxed),
            log_failures: self.log_failures.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
        }
    }
}
