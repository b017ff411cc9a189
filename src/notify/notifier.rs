//! Post-removal notifier
//!
//! Runs after the slot lock is released: eviction accounting, index
//! maintenance, replication, listeners and the persistence log.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::destroy::Outcome;
use crate::entry::slot_locks_held;
use crate::error::Result;
use crate::oplog::{LogOp, LogWriter};
use crate::stats::RegionStats;
use crate::version::VersionMarker;
use crate::{Key, Value};

use super::{Collaborators, IndexManager, RemovalEvent};

/// Scoped index quiesce token; `quiesce_end` runs on drop, on every path
pub struct QuiesceGuard<'a> {
    index: &'a dyn IndexManager,
}

impl<'a> QuiesceGuard<'a> {
    pub fn new(index: &'a dyn IndexManager) -> Self {
        index.quiesce_begin();
        Self { index }
    }
}

impl Drop for QuiesceGuard<'_> {
    fn drop(&mut self) {
        self.index.quiesce_end();
    }
}

/// Fans committed outcomes out to the region's collaborators
///
/// ## Concurrency:
/// - `log`: behind a mutex that is never taken while a slot lock is held
/// - `next_lsn`: reserved under the slot lock of the mutation it numbers, so
///   per key the LSN order is the commit order even though appends happen
///   after unlock, in any order
pub struct PostRemovalNotifier {
    collaborators: Collaborators,

    /// Persistence log; attached after recovery so replay is not re-logged
    log: Mutex<Option<LogWriter>>,

    /// Set once a log is attached; until then nothing reserves LSNs
    logging: AtomicBool,
    next_lsn: AtomicU64,

    stats: Arc<RegionStats>,
}

impl PostRemovalNotifier {
    pub fn new(collaborators: Collaborators, stats: Arc<RegionStats>) -> Self {
        Self {
            collaborators,
            log: Mutex::new(None),
            logging: AtomicBool::new(false),
            next_lsn: AtomicU64::new(1),
            stats,
        }
    }

    /// Start persisting committed mutations to `writer`
    pub fn attach_log(&self, writer: LogWriter) {
        let mut log = self.log.lock();
        self.next_lsn.store(writer.current_lsn(), Ordering::SeqCst);
        *log = Some(writer);
        self.logging.store(true, Ordering::SeqCst);
    }

    /// Reserve the LSN of a mutation about to commit; `None` without a log.
    ///
    /// Called under the slot lock. Reservations that end up not mutating
    /// leave gaps, which replay tolerates.
    pub fn reserve_lsn(&self) -> Option<u64> {
        if !self.logging.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.next_lsn.fetch_add(1, Ordering::SeqCst))
    }

    /// Take the index quiesce token if an index exists
    pub fn quiesce(&self) -> Option<QuiesceGuard<'_>> {
        self.collaborators
            .index
            .as_deref()
            .map(QuiesceGuard::new)
    }

    /// Eviction eligibility re-check; consulted under the slot lock.
    ///
    /// Without an eviction controller every eviction request stands.
    pub fn is_still_eligible(&self, key: &Key, value: &Value) -> bool {
        match &self.collaborators.eviction {
            Some(eviction) => eviction.is_still_eligible(key, value),
            None => true,
        }
    }

    /// Report a committed destroy
    pub fn after_removal(&self, event: &RemovalEvent) {
        debug_assert_eq!(slot_locks_held(), 0, "notifier invoked under a slot lock");

        if event.old_value.is_some() {
            if let Some(eviction) = &self.collaborators.eviction {
                match event.outcome {
                    Outcome::Tombstoned => eviction.notify_tombstoned(&event.key),
                    _ => eviction.notify_removed(&event.key),
                }
            }
            if let Some(index) = &self.collaborators.index {
                index.remove_mapping(&event.key);
            }
        }

        if event.distribute {
            if let Some(replication) = &self.collaborators.replication {
                replication.distribute(event);
            }
        }

        if event.notify_listeners {
            for listener in &self.collaborators.listeners {
                listener.after_destroy(&event.key, event.outcome);
            }
        }

        if let Some(lsn) = event.lsn {
            self.persist(
                lsn,
                LogOp::Destroy {
                    key: event.key.clone(),
                    marker: event.marker,
                    tombstone: event.outcome == Outcome::Tombstoned,
                },
            );
        }
    }

    /// Propagate the marker of an operation that lost a version conflict
    pub fn after_conflict(&self, key: &Key, marker: &VersionMarker) {
        debug_assert_eq!(slot_locks_held(), 0, "notifier invoked under a slot lock");

        if let Some(replication) = &self.collaborators.replication {
            replication.notify_timestamp_update(key, marker);
        }
    }

    /// Persist a committed create or update under its reserved LSN
    pub fn after_put(&self, lsn: u64, key: &Key, value: &Value, marker: Option<VersionMarker>) {
        self.persist(
            lsn,
            LogOp::Put {
                key: key.clone(),
                value: value.clone(),
                marker,
            },
        );
    }

    /// Report a region clear to listeners and the log
    pub fn after_clear(&self, lsn: Option<u64>) {
        debug_assert_eq!(slot_locks_held(), 0, "notifier invoked under a slot lock");

        for listener in &self.collaborators.listeners {
            listener.after_clear();
        }
        if let Some(lsn) = lsn {
            self.persist(lsn, LogOp::Clear);
        }
    }

    /// Flush and fsync the persistence log, if any
    pub fn sync_log(&self) -> Result<()> {
        match self.log.lock().as_mut() {
            Some(writer) => writer.sync(),
            None => Ok(()),
        }
    }

    /// Append to the log. Failures are reported, never unwound: the
    /// in-memory state change has already happened.
    fn persist(&self, lsn: u64, op: LogOp) {
        let mut log = self.log.lock();
        let Some(writer) = log.as_mut() else {
            return;
        };

        if let Err(e) = writer.append_at(lsn, op) {
            self.stats.record_log_failure();
            tracing::error!(error = %e, lsn, path = %writer.path().display(), "persistence log append failed");
        }
    }
}
