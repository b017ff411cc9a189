//! Version Authority
//!
//! Decides the relative order of two markers and issues new ones.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::Key;

use super::{MemberId, VersionMarker};

/// Result of comparing an incoming marker with the one stored on a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The incoming operation is causally newer; apply it
    Newer,

    /// Same marker: the operation was already applied
    Replay,

    /// The incoming operation is older than the slot's state
    Conflict(ConflictReason),
}

/// Why an incoming marker lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Same member, lower region version
    StaleRegionVersion,

    /// Different members, incoming timestamp (or member tie-break) is lower
    OlderTimestamp,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::StaleRegionVersion => write!(f, "stale region version"),
            ConflictReason::OlderTimestamp => write!(f, "older timestamp"),
        }
    }
}

/// Produces and validates version markers for one member's copy of a region.
///
/// ## Concurrency:
/// - `region_version` and `last_timestamp` are atomics; every method takes `&self`
/// - `decide` touches no state at all and is safe to call under a slot lock
pub struct VersionAuthority {
    /// Member stamped on every issued marker
    member: MemberId,

    /// Last region version issued (or observed from our own member)
    region_version: AtomicU64,

    /// Highest timestamp issued or observed, keeps issued timestamps monotonic
    last_timestamp: AtomicU64,
}

impl VersionAuthority {
    /// Create an authority for the given member
    pub fn new(member: MemberId) -> Self {
        Self {
            member,
            region_version: AtomicU64::new(0),
            last_timestamp: AtomicU64::new(0),
        }
    }

    /// Compare a request's marker against the slot's current marker.
    ///
    /// A missing marker on either side never blocks the request: unversioned
    /// operations always apply, and an unversioned slot accepts any version.
    pub fn decide(request: Option<&VersionMarker>, slot: Option<&VersionMarker>) -> Decision {
        let (incoming, current) = match (request, slot) {
            (Some(incoming), Some(current)) => (incoming, current),
            _ => return Decision::Newer,
        };

        if incoming == current {
            return Decision::Replay;
        }

        if incoming > current {
            Decision::Newer
        } else if incoming.same_origin(current) {
            Decision::Conflict(ConflictReason::StaleRegionVersion)
        } else {
            Decision::Conflict(ConflictReason::OlderTimestamp)
        }
    }

    /// Issue a marker for a locally originated operation on `key`.
    ///
    /// The result orders after `observed` (the slot's current marker), so a
    /// local operation always wins against the state it was decided on.
    pub fn generate_marker_for(&self, key: &Key, observed: Option<&VersionMarker>) -> VersionMarker {
        let region_version = self.region_version.fetch_add(1, Ordering::SeqCst) + 1;
        let mut marker = VersionMarker::new(self.member, region_version, self.next_timestamp());

        if let Some(observed) = observed {
            if marker <= *observed {
                marker.timestamp = observed.timestamp + 1;
                self.last_timestamp.fetch_max(marker.timestamp, Ordering::SeqCst);
            }
        }

        tracing::trace!(key = ?key, %marker, "generated version marker");
        marker
    }

    /// Fold a marker seen from elsewhere (replication, log replay) into the
    /// local clock so later markers order after it.
    pub fn observe(&self, marker: &VersionMarker) {
        self.last_timestamp.fetch_max(marker.timestamp, Ordering::SeqCst);
        if marker.member == self.member {
            self.region_version
                .fetch_max(marker.region_version, Ordering::SeqCst);
        }
    }

    /// Member this authority issues markers for
    pub fn member(&self) -> MemberId {
        self.member
    }

    /// Last region version issued or observed for this member
    pub fn current_region_version(&self) -> u64 {
        self.region_version.load(Ordering::SeqCst)
    }

    /// Wall-clock millis, forced strictly past anything issued or observed
    fn next_timestamp(&self) -> u64 {
        let now = now_millis();
        let advance = |last: u64| last.saturating_add(1).max(now);
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(advance(last)))
            .unwrap_or_else(|last| last);
        advance(previous)
    }
}

/// Current wall-clock time in unix millis
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
