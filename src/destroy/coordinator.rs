//! Destroy Coordinator
//!
//! Drives one destroy request through locate, lock, decide, mutate, unlock
//! and notify. Each phase is its own function; the slot lock's scope is the
//! body of `DestroyCoordinator::settle` between `lock()` and the explicit
//! `drop(guard)`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLockReadGuard;

use crate::config::RegionConfig;
use crate::entry::{EntrySlot, EntryTable, SlotGuard, SlotState};
use crate::error::DestroyError;
use crate::notify::{PostRemovalNotifier, RemovalEvent};
use crate::stats::RegionStats;
use crate::tombstone::TombstoneSweeper;
use crate::version::{ConflictReason, Decision, VersionAuthority, VersionMarker};
use crate::Value;

use super::{DestroyRequest, Outcome, SuppressReason};

/// The region settings that shape tombstone decisions
#[derive(Debug, Clone, Copy)]
pub struct TombstonePolicy {
    pub concurrency_checks_enabled: bool,
    pub tombstone_timeout: Duration,
    pub recovered_tombstone_timeout: Duration,
}

impl TombstonePolicy {
    pub fn from_config(config: &RegionConfig) -> Self {
        Self {
            concurrency_checks_enabled: config.concurrency_checks_enabled,
            tombstone_timeout: config.tombstone_timeout,
            recovered_tombstone_timeout: config.recovered_tombstone_timeout,
        }
    }

    /// Whether a versioned destroy must leave a tombstone behind.
    ///
    /// A versioned destroy replayed from the log was logged as a tombstone,
    /// so it converges again.
    pub fn requires_convergence(&self, request: &DestroyRequest) -> bool {
        self.concurrency_checks_enabled
            || request.is_remote_origin
            || request.gateway_tagged
            || (request.recovering_from_persistent_log && request.marker.is_some())
    }

    /// Retention window for a tombstone written by `request`
    pub fn retention(&self, request: &DestroyRequest) -> Duration {
        if request.recovering_from_persistent_log {
            self.recovered_tombstone_timeout
        } else {
            self.tombstone_timeout
        }
    }
}

/// Marker a tombstone will record
#[derive(Debug, Clone, Copy)]
enum NewMarker {
    Carried(VersionMarker),
    /// Issue a fresh local marker ordered after the slot's current one
    Generate,
}

/// Another thread unlinked the slot between locate and lock
struct SlotUnlinked;

/// What to do with the locked slot (steps 3-4)
#[derive(Debug)]
enum Plan {
    /// The table generation moved: the region was cleared under us
    RegionCleared,
    Reject {
        error: DestroyError,
        discard: bool,
    },
    Suppress {
        reason: SuppressReason,
        discard: bool,
    },
    Replay,
    Conflict {
        incoming: VersionMarker,
        current: VersionMarker,
        reason: ConflictReason,
    },
    Remove {
        marker: Option<VersionMarker>,
    },
    Tombstone {
        marker: NewMarker,
    },
    /// Keep the placeholder as a provisional removal until bulk load ends
    RetainPlaceholder,
    /// Nothing to remove, but the caller is owed a success
    Vacuous {
        discard: bool,
    },
}

/// Result of the locked phase, consumed after unlock
struct Commit {
    result: Result<Outcome, DestroyError>,
    event: Option<RemovalEvent>,

    /// The slot was moved to `Removed` and should leave the table
    unlink: bool,

    /// Marker of an operation that lost a conflict, to propagate
    conflict: Option<VersionMarker>,

    /// Tombstone marker to (re)schedule for the retention sweep
    schedule: Option<VersionMarker>,
}

impl Commit {
    fn quiet(result: Result<Outcome, DestroyError>) -> Self {
        Self {
            result,
            event: None,
            unlink: false,
            conflict: None,
            schedule: None,
        }
    }
}

enum Attempt {
    TransientRace,
    Finished(Commit),
}

/// Drives destroy requests for one region
///
/// ## Concurrency:
/// - Holds at most one slot lock at a time, for steps 2-6 only
/// - Holds the table's modification token only from locate to lock
/// - Never calls a collaborator under the slot lock, except the eviction
///   eligibility re-check
pub struct DestroyCoordinator {
    table: Arc<EntryTable>,
    authority: Arc<VersionAuthority>,
    sweeper: Arc<TombstoneSweeper>,
    notifier: Arc<PostRemovalNotifier>,
    stats: Arc<RegionStats>,
    policy: TombstonePolicy,
}

impl DestroyCoordinator {
    pub fn new(
        table: Arc<EntryTable>,
        authority: Arc<VersionAuthority>,
        sweeper: Arc<TombstoneSweeper>,
        notifier: Arc<PostRemovalNotifier>,
        stats: Arc<RegionStats>,
        policy: TombstonePolicy,
    ) -> Self {
        Self {
            table,
            authority,
            sweeper,
            notifier,
            stats,
            policy,
        }
    }

    /// Destroy `request.key`, retrying transparently across races.
    ///
    /// Returns only after the outcome has been reported to every
    /// collaborator.
    pub fn destroy(&self, request: &DestroyRequest) -> Result<Outcome, DestroyError> {
        let _span = tracing::debug_span!("destroy", key = ?request.key).entered();

        if let Some(marker) = &request.marker {
            self.authority.observe(marker);
        }

        let mut retries = 0u64;
        loop {
            match self.attempt(request) {
                Attempt::TransientRace => {
                    retries += 1;
                    self.stats.record_retry();
                    tracing::trace!(retries, "slot unlinked concurrently, retrying");
                }
                Attempt::Finished(commit) => return self.finish(request, commit),
            }
        }
    }

    /// One pass through steps 1-6
    fn attempt(&self, request: &DestroyRequest) -> Attempt {
        let _quiesce = self.notifier.quiesce();

        let token = self.table.modification_token();
        let (slot, installed) = self.table.locate_or_install(&request.key);
        self.settle(request, &slot, installed, token)
    }

    /// Steps 2-6 on a located slot; releases `token` once the slot is locked
    fn settle(
        &self,
        request: &DestroyRequest,
        slot: &Arc<EntrySlot>,
        installed: bool,
        token: RwLockReadGuard<'_, ()>,
    ) -> Attempt {
        let mut guard = slot.lock();
        drop(token);

        // Reserved before the generation check: a clear that this attempt
        // does not observe is logged after it.
        let lsn = self.notifier.reserve_lsn();

        let plan = match self.decide(request, &guard, installed) {
            Ok(plan) => plan,
            Err(SlotUnlinked) => {
                drop(guard);
                // Help the thread that removed it, so the next locate sees a fresh slot.
                self.table.remove_if(&request.key, slot);
                return Attempt::TransientRace;
            }
        };
        tracing::trace!(?plan, installed, ?lsn, "decided");

        let commit = self.mutate(request, &mut guard, plan, lsn);
        drop(guard);

        if commit.unlink {
            self.table.remove_if(&request.key, slot);
        }
        Attempt::Finished(commit)
    }

    // =========================================================================
    // Deciding (under the slot lock)
    // =========================================================================

    fn decide(
        &self,
        request: &DestroyRequest,
        guard: &SlotGuard<'_>,
        installed: bool,
    ) -> Result<Plan, SlotUnlinked> {
        if guard.slot().generation() != self.table.generation() {
            return Ok(Plan::RegionCleared);
        }

        match guard.state() {
            SlotState::Removed => Err(SlotUnlinked),
            SlotState::Live(value) => Ok(self.decide_live(request, value, guard.version())),
            SlotState::Tombstone(current) => Ok(self.decide_tombstone(request, *current)),
            SlotState::RemovingPlaceholder => Ok(self.decide_absent(request, installed)),
        }
    }

    fn decide_live(
        &self,
        request: &DestroyRequest,
        value: &Value,
        version: Option<VersionMarker>,
    ) -> Plan {
        if let Some(expected) = &request.expected_old_value {
            if expected != value {
                return Plan::Reject {
                    error: DestroyError::ConditionalMismatch,
                    discard: false,
                };
            }
        }

        if request.is_eviction {
            // Eligibility was decided outside the lock; it may be stale by now.
            if !self.notifier.is_still_eligible(&request.key, value) {
                return Plan::Suppress {
                    reason: SuppressReason::Eviction,
                    discard: false,
                };
            }
            return Plan::Remove { marker: None };
        }

        match request.marker {
            Some(incoming) => {
                let apply = if self.policy.requires_convergence(request) {
                    Plan::Tombstone {
                        marker: NewMarker::Carried(incoming),
                    }
                } else {
                    Plan::Remove {
                        marker: Some(incoming),
                    }
                };
                Self::versioned(incoming, version, apply)
            }
            None if self.policy.concurrency_checks_enabled
                && !request.is_remote_origin
                && !request.recovering_from_persistent_log =>
            {
                Plan::Tombstone {
                    marker: NewMarker::Generate,
                }
            }
            None => Plan::Remove { marker: None },
        }
    }

    fn decide_tombstone(&self, request: &DestroyRequest, current: VersionMarker) -> Plan {
        if request.is_eviction {
            return Plan::Suppress {
                reason: SuppressReason::Eviction,
                discard: false,
            };
        }
        if request.expected_old_value.is_some() {
            return Plan::Reject {
                error: DestroyError::ConditionalMismatch,
                discard: false,
            };
        }

        match request.marker {
            Some(incoming) => Self::versioned(
                incoming,
                Some(current),
                Plan::Tombstone {
                    marker: NewMarker::Carried(incoming),
                },
            ),
            None if request.recovering_from_persistent_log => Plan::Vacuous { discard: false },
            // A local destroy of a key that is already deleted
            None => Plan::Reject {
                error: DestroyError::NotFound,
                discard: false,
            },
        }
    }

    /// No entry exists: the slot is a placeholder (ours if `installed`)
    fn decide_absent(&self, request: &DestroyRequest, installed: bool) -> Plan {
        if request.is_eviction {
            return Plan::Suppress {
                reason: SuppressReason::Eviction,
                discard: installed,
            };
        }
        if request.expected_old_value.is_some() {
            return Plan::Reject {
                error: DestroyError::ConditionalMismatch,
                discard: installed,
            };
        }

        if let Some(incoming) = request.marker {
            if self.policy.requires_convergence(request) {
                // Nothing to protect, but a late stale create must still lose.
                return Plan::Tombstone {
                    marker: NewMarker::Carried(incoming),
                };
            }
        }

        if request.in_bulk_load_mode {
            Plan::RetainPlaceholder
        } else if request.recovering_from_persistent_log {
            Plan::Vacuous { discard: installed }
        } else {
            Plan::Reject {
                error: DestroyError::NotFound,
                discard: installed,
            }
        }
    }

    /// Apply the authority's verdict; `apply` is the plan for a newer marker
    fn versioned(incoming: VersionMarker, current: Option<VersionMarker>, apply: Plan) -> Plan {
        match (VersionAuthority::decide(Some(&incoming), current.as_ref()), current) {
            (Decision::Replay, _) => Plan::Replay,
            (Decision::Conflict(reason), Some(current)) => Plan::Conflict {
                incoming,
                current,
                reason,
            },
            _ => apply,
        }
    }

    // =========================================================================
    // Mutating (under the slot lock)
    // =========================================================================

    fn mutate(
        &self,
        request: &DestroyRequest,
        guard: &mut SlotGuard<'_>,
        plan: Plan,
        lsn: Option<u64>,
    ) -> Commit {
        match plan {
            Plan::RegionCleared => Commit::quiet(Ok(Outcome::Removed)),

            Plan::Reject { error, discard } => {
                let mut commit = Commit::quiet(Err(error));
                commit.unlink = discard && Self::discard(guard);
                commit
            }

            Plan::Suppress { reason, discard } => {
                let mut commit = Commit::quiet(Ok(Outcome::Suppressed(reason)));
                commit.unlink = discard && Self::discard(guard);
                commit
            }

            Plan::Replay => Commit::quiet(Ok(Outcome::Replay)),

            Plan::Conflict {
                incoming,
                current,
                reason,
            } => {
                let replaying_history = request.is_remote_origin
                    || request.gateway_tagged
                    || request.recovering_from_persistent_log;
                let result = if replaying_history {
                    Ok(Outcome::Replay)
                } else {
                    Err(DestroyError::VersionConflict {
                        incoming,
                        current,
                        reason,
                    })
                };
                let mut commit = Commit::quiet(result);
                commit.conflict = Some(incoming);
                commit
            }

            Plan::Remove { marker } => {
                let previous = guard.mark_removed();
                let mut commit = Commit::quiet(Ok(Outcome::Removed));
                commit.event = Some(self.event(request, Outcome::Removed, previous, marker, lsn));
                commit.unlink = true;
                commit
            }

            Plan::Tombstone { marker } => {
                let marker = match marker {
                    NewMarker::Carried(marker) => marker,
                    NewMarker::Generate => self
                        .authority
                        .generate_marker_for(&request.key, guard.version().as_ref()),
                };
                let previous = guard.set_tombstone(marker);
                let mut commit = Commit::quiet(Ok(Outcome::Tombstoned));
                commit.event = Some(self.event(
                    request,
                    Outcome::Tombstoned,
                    previous,
                    Some(marker),
                    lsn,
                ));
                commit.schedule = Some(marker);
                commit
            }

            Plan::RetainPlaceholder => {
                guard.retain_provisional();
                Commit::quiet(Ok(Outcome::Removed))
            }

            Plan::Vacuous { discard } => {
                let mut commit = Commit::quiet(Ok(Outcome::Removed));
                commit.unlink = discard && Self::discard(guard);
                commit
            }
        }
    }

    /// Retire a placeholder this attempt installed
    fn discard(guard: &mut SlotGuard<'_>) -> bool {
        guard.mark_removed();
        true
    }

    fn event(
        &self,
        request: &DestroyRequest,
        outcome: Outcome,
        previous: SlotState,
        marker: Option<VersionMarker>,
        lsn: Option<u64>,
    ) -> RemovalEvent {
        let old_value = match previous {
            SlotState::Live(value) => Some(value),
            _ => None,
        };

        let is_remote_origin = request.is_remote_origin || request.gateway_tagged;
        RemovalEvent {
            key: request.key.clone(),
            outcome,
            old_value,
            marker,
            is_remote_origin,
            is_eviction: request.is_eviction,
            distribute: !is_remote_origin
                && !request.is_eviction
                && !request.recovering_from_persistent_log,
            notify_listeners: !request.during_initial_transfer,
            lsn: lsn.filter(|_| !request.recovering_from_persistent_log),
        }
    }

    // =========================================================================
    // Notifying (after unlock)
    // =========================================================================

    fn finish(&self, request: &DestroyRequest, commit: Commit) -> Result<Outcome, DestroyError> {
        if let Some(marker) = commit.schedule {
            self.sweeper
                .schedule(request.key.clone(), marker, self.policy.retention(request));
        }

        if let Some(marker) = &commit.conflict {
            if commit.result.is_ok() {
                self.stats.record_conflict();
            }
            self.notifier.after_conflict(&request.key, marker);
        }

        if let Some(event) = &commit.event {
            self.notifier.after_removal(event);
        }

        self.stats.record_destroy(&commit.result);
        tracing::debug!(result = ?commit.result, "destroy finished");
        commit.result
    }
}
