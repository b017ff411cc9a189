//! Region Module
//!
//! The facade that owns one region's entry table and wires the destroy
//! coordinator to its collaborators.
//!
//! ## Responsibilities
//! - Create, update and destroy entries under per-slot locks
//! - Replay the persistence log on open, then log every committed mutation
//! - Region-wide clear and bulk-load bookkeeping
//! - Tombstone expiry, either on demand or from a background sweeper thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, select, Sender};

use crate::config::RegionConfig;
use crate::destroy::{DestroyCoordinator, DestroyRequest, Outcome, TombstonePolicy};
use crate::entry::{EntryTable, SlotSnapshot, SlotState};
use crate::error::{DestroyError, Result};
use crate::notify::{Collaborators, PostRemovalNotifier};
use crate::oplog::{LogOp, LogRecord, LogRecovery, LogWriter};
use crate::stats::{RegionStats, StatsSnapshot};
use crate::tombstone::TombstoneSweeper;
use crate::version::{Decision, VersionAuthority, VersionMarker};
use crate::{Key, Value};

/// Result of a put
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PutOutcome {
    /// No live value existed (absent, removed or tombstoned before)
    Created,

    /// A live value was replaced
    Updated,

    /// The same version was already applied
    Replay,

    /// A newer version, or a removal recorded during bulk load, holds the key
    Superseded,
}

/// Where a put came from
#[derive(Debug, Clone, Copy)]
enum PutOrigin {
    Local,
    Remote(VersionMarker),
    BulkLoad(Option<VersionMarker>),
    Recovered(Option<VersionMarker>),
}

impl PutOrigin {
    fn marker(&self) -> Option<VersionMarker> {
        match *self {
            PutOrigin::Local => None,
            PutOrigin::Remote(marker) => Some(marker),
            PutOrigin::BulkLoad(marker) | PutOrigin::Recovered(marker) => marker,
        }
    }
}

/// One region of entries
///
/// ## Concurrency Model
///
/// Every per-key decision happens under that key's slot lock, and a thread
/// holds at most one slot lock. Collaborators (listeners, replication, index,
/// persistence log) run only after the lock is released. A `clear()` takes
/// the table's modification token exclusively and waits for in-flight
/// operations to reach their slot lock.
pub struct Region {
    config: RegionConfig,
    table: Arc<EntryTable>,
    authority: Arc<VersionAuthority>,
    sweeper: Arc<TombstoneSweeper>,
    notifier: Arc<PostRemovalNotifier>,
    stats: Arc<RegionStats>,
    coordinator: DestroyCoordinator,

    /// Set between `begin_bulk_load` and `finish_bulk_load`
    bulk_loading: AtomicBool,
}

impl Region {
    /// Open a region with the given config
    ///
    /// On startup:
    /// 1. Validate the config
    /// 2. Replay the persistence log if one is configured and exists
    /// 3. Attach a log writer continuing after the last recovered LSN
    pub fn open(config: RegionConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let table = Arc::new(EntryTable::new(config.shard_count));
        let authority = Arc::new(VersionAuthority::new(config.member_id));
        let sweeper = Arc::new(TombstoneSweeper::new());
        let stats = Arc::new(RegionStats::new());
        let notifier = Arc::new(PostRemovalNotifier::new(collaborators, Arc::clone(&stats)));

        let coordinator = DestroyCoordinator::new(
            Arc::clone(&table),
            Arc::clone(&authority),
            Arc::clone(&sweeper),
            Arc::clone(&notifier),
            Arc::clone(&stats),
            TombstonePolicy::from_config(&config),
        );

        let region = Self {
            config,
            table,
            authority,
            sweeper,
            notifier,
            stats,
            coordinator,
            bulk_loading: AtomicBool::new(false),
        };

        if let Some(path) = region.config.log_path.clone() {
            let next_lsn = if path.exists() {
                let (records, result) = LogRecovery::recover(&path)?;
                if result.entries_recovered > 0 || result.entries_corrupted > 0 {
                    tracing::info!(
                        region = %region.config.name,
                        recovered = result.entries_recovered,
                        corrupted = result.entries_corrupted,
                        last_lsn = result.last_lsn,
                        "persistence log recovery"
                    );
                }
                region.replay(records);
                result.last_lsn + 1
            } else {
                1
            };

            let writer = LogWriter::open_at(&path, region.config.log_sync_strategy, next_lsn)?;
            region.notifier.attach_log(writer);
        }

        tracing::debug!(region = %region.config.name, member = %region.config.member_id, "region open");
        Ok(region)
    }

    fn replay(&self, mut records: Vec<LogRecord>) {
        // Appends land after unlock, so file order can differ from commit
        // order. Per key, LSN order cannot: LSNs are reserved under the slot lock.
        records.sort_by_key(|record| record.lsn);

        for record in records {
            tracing::trace!(lsn = record.lsn, key = ?record.op.key(), "replay");
            match record.op {
                LogOp::Put { key, value, marker } => {
                    self.apply_put(key, value, PutOrigin::Recovered(marker));
                }
                LogOp::Destroy {
                    key,
                    marker,
                    tombstone,
                } => {
                    let marker = marker.filter(|_| tombstone);
                    // NotFound and conflicts are expected while replaying history.
                    let _ = self.coordinator.destroy(&DestroyRequest::recovered(key, marker));
                }
                LogOp::Clear => {
                    self.table.clear();
                    self.sweeper.clear();
                }
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Live value for `key`
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        let slot = self.table.get(&Key::copy_from_slice(key))?;
        let guard = slot.lock();
        guard.live_value().cloned()
    }

    /// Full state of the slot for `key`, tombstones included
    pub fn entry(&self, key: &[u8]) -> Option<SlotSnapshot> {
        self.table
            .get(&Key::copy_from_slice(key))
            .map(|slot| slot.snapshot())
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.count(|state| state.is_live())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstones still retained
    pub fn tombstone_count(&self) -> usize {
        self.count(|state| state.is_tombstone())
    }

    fn count(&self, matches: impl Fn(&SlotState) -> bool) -> usize {
        self.table
            .slots()
            .iter()
            .filter(|slot| matches(slot.lock().state()))
            .count()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create or update `key` from the local API
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> PutOutcome {
        self.apply_put(key.into(), value.into(), PutOrigin::Local)
    }

    /// Apply a put replicated from another member
    pub fn apply_remote_put(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
        marker: VersionMarker,
    ) -> PutOutcome {
        self.apply_put(key.into(), value.into(), PutOrigin::Remote(marker))
    }

    /// Apply a put received through the initial bulk transfer.
    ///
    /// Never overwrites a removal recorded during the load or a newer version.
    pub fn bulk_put(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
        marker: Option<VersionMarker>,
    ) -> PutOutcome {
        self.apply_put(key.into(), value.into(), PutOrigin::BulkLoad(marker))
    }

    fn apply_put(&self, key: Key, value: Value, origin: PutOrigin) -> PutOutcome {
        let incoming = origin.marker();
        if let Some(marker) = &incoming {
            self.authority.observe(marker);
        }

        loop {
            let token = self.table.modification_token();
            let (slot, _) = self.table.locate_or_install(&key);
            let mut guard = slot.lock();
            drop(token);

            // Before the generation check, so an unobserved clear logs after us
            let lsn = match origin {
                PutOrigin::Recovered(_) => None,
                _ => self.notifier.reserve_lsn(),
            };

            if guard.slot().generation() != self.table.generation()
                || *guard.state() == SlotState::Removed
            {
                drop(guard);
                self.table.remove_if(&key, &slot);
                self.stats.record_retry();
                continue;
            }

            let current = guard.version();
            match (VersionAuthority::decide(incoming.as_ref(), current.as_ref()), current) {
                (Decision::Replay, _) => return PutOutcome::Replay,
                (Decision::Conflict(reason), Some(current)) => {
                    drop(guard);
                    if let Some(incoming) = &incoming {
                        tracing::debug!(key = ?key, %incoming, %current, %reason, "put lost version conflict");
                        self.stats.record_conflict();
                        self.notifier.after_conflict(&key, incoming);
                    }
                    return PutOutcome::Superseded;
                }
                _ => {}
            }

            if let PutOrigin::BulkLoad(marker) = origin {
                let removed_during_load = guard.is_provisional()
                    || (guard.state().is_tombstone() && marker.is_none());
                if removed_during_load {
                    return PutOutcome::Superseded;
                }
            }

            // A key that carries a marker keeps one, checks or not, so older
            // remote operations still lose against this put.
            let marker = match origin {
                PutOrigin::Local if self.config.concurrency_checks_enabled || current.is_some() => {
                    Some(self.authority.generate_marker_for(&key, current.as_ref()))
                }
                _ => incoming,
            };
            let previous = guard.set_live(value.clone(), marker);
            drop(guard);

            if let SlotState::Tombstone(tombstone) = &previous {
                self.sweeper.cancel(&key, tombstone);
            }
            if let Some(lsn) = lsn {
                self.notifier.after_put(lsn, &key, &value, marker);
            }

            return if previous.is_live() {
                PutOutcome::Updated
            } else {
                PutOutcome::Created
            };
        }
    }

    // =========================================================================
    // Destroys
    // =========================================================================

    /// Run a destroy request through the coordinator.
    ///
    /// While a bulk load is in progress the request is flagged as part of it.
    pub fn destroy(&self, request: DestroyRequest) -> std::result::Result<Outcome, DestroyError> {
        let mut request = request;
        if self.is_bulk_loading() {
            request.in_bulk_load_mode = true;
            request.during_initial_transfer = true;
        }
        self.coordinator.destroy(&request)
    }

    /// Destroy `key` from the local API
    pub fn remove(&self, key: impl Into<Key>) -> std::result::Result<Outcome, DestroyError> {
        self.destroy(DestroyRequest::local(key))
    }

    /// Destroy `key` only if its live value equals `expected`
    pub fn remove_if_equals(
        &self,
        key: impl Into<Key>,
        expected: impl Into<Value>,
    ) -> std::result::Result<Outcome, DestroyError> {
        self.destroy(DestroyRequest::local(key).expect_value(expected))
    }

    /// Evict `key` if the eviction controller still agrees
    pub fn evict(&self, key: impl Into<Key>) -> std::result::Result<Outcome, DestroyError> {
        self.destroy(DestroyRequest::eviction(key))
    }

    /// Apply a destroy replicated from another member
    pub fn apply_remote_destroy(
        &self,
        key: impl Into<Key>,
        marker: VersionMarker,
    ) -> std::result::Result<Outcome, DestroyError> {
        self.destroy(DestroyRequest::remote(key, marker))
    }

    // =========================================================================
    // Region-wide operations
    // =========================================================================

    /// Drop every entry and tombstone. Returns the number of slots dropped.
    pub fn clear(&self) -> usize {
        let (cleared, lsn) = self.table.clear_with(|| self.notifier.reserve_lsn());
        self.sweeper.clear();
        self.stats.record_clear();
        self.notifier.after_clear(lsn);

        tracing::debug!(region = %self.config.name, cleared, "region cleared");
        cleared
    }

    /// Start an initial bulk transfer: destroys of absent keys are retained
    /// as provisional removals so the transfer cannot resurrect them
    pub fn begin_bulk_load(&self) {
        self.bulk_loading.store(true, Ordering::Release);
    }

    /// End the bulk transfer and drop the provisional removals.
    ///
    /// Returns the number of placeholders dropped.
    pub fn finish_bulk_load(&self) -> usize {
        self.bulk_loading.store(false, Ordering::Release);

        let mut dropped = 0;
        for slot in self.table.slots() {
            let mut guard = slot.lock();
            let provisional =
                guard.is_provisional() && *guard.state() == SlotState::RemovingPlaceholder;
            if provisional {
                guard.mark_removed();
            }
            drop(guard);

            if provisional {
                self.table.remove_if(slot.key(), &slot);
                dropped += 1;
            }
        }

        tracing::debug!(region = %self.config.name, dropped, "bulk load finished");
        dropped
    }

    pub fn is_bulk_loading(&self) -> bool {
        self.bulk_loading.load(Ordering::Acquire)
    }

    /// Purge tombstones whose retention ended at or before `now`.
    ///
    /// A tombstone refreshed or resurrected since it was scheduled is left
    /// alone. Returns the number purged.
    pub fn expire_tombstones(&self, now: Instant) -> usize {
        let mut expired = 0;

        for (key, marker) in self.sweeper.due(now) {
            let Some(slot) = self.table.get(&key) else {
                continue;
            };

            let mut guard = slot.lock();
            let purge = *guard.state() == SlotState::Tombstone(marker);
            if purge {
                guard.mark_removed();
            }
            drop(guard);

            if purge {
                self.table.remove_if(&key, &slot);
                expired += 1;
            }
        }

        if expired > 0 {
            self.stats.record_expired(expired);
            tracing::debug!(region = %self.config.name, expired, "tombstones expired");
        }
        expired
    }

    /// Erase `Removed` slots that were left linked. Returns the number erased.
    pub fn unlink_removed(&self) -> usize {
        self.table.unlink_removed()
    }

    /// Run `expire_tombstones` and `unlink_removed` every `interval` on a
    /// background thread until the handle is dropped or the region is.
    pub fn start_tombstone_sweeper(self: &Arc<Self>, interval: Duration) -> Result<SweeperHandle> {
        let region = Arc::downgrade(self);
        let (shutdown, shutdown_rx) = channel::bounded::<()>(1);
        let name = format!("{}-sweeper", self.config.name);

        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || run_sweeper(region, interval, shutdown_rx))?;

        Ok(SweeperHandle {
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    /// Flush the persistence log
    pub fn close(&self) -> Result<()> {
        self.notifier.sync_log()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Marker scheduled for expiry of the tombstone at `key`
    pub fn scheduled_tombstone(&self, key: &[u8]) -> Option<VersionMarker> {
        self.sweeper.scheduled_marker(&Key::copy_from_slice(key))
    }

    /// Slots in the table, in any state
    pub fn slot_count(&self) -> usize {
        self.table.len()
    }
}

fn run_sweeper(region: Weak<Region>, interval: Duration, shutdown: channel::Receiver<()>) {
    let ticker = channel::tick(interval);

    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => {
                let Some(region) = region.upgrade() else {
                    break;
                };
                let expired = region.expire_tombstones(Instant::now());
                let unlinked = region.unlink_removed();
                tracing::trace!(expired, unlinked, "sweep");
            }
        }
    }
}

/// Stops the background sweeper when dropped
pub struct SweeperHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its thread to exit
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        // Dropping the sender wakes the select with a disconnect.
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("tombstone sweeper thread panicked");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
