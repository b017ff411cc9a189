//! Destroy Module
//!
//! The entry-removal state machine.
//!
//! ## States
//! ```text
//! Start ─► Locating ─► Locked ─► Deciding ─► Mutating ─► Unlocked ─► Notify ─► Terminal
//!              ▲                    │
//!              └──── TransientRace ─┘
//! ```
//! A retry only happens after another thread made observable progress on
//! the same key (it unlinked the slot this attempt found), so there is no
//! retry bound.

mod coordinator;

pub use coordinator::{DestroyCoordinator, TombstonePolicy};

use std::fmt;

use crate::version::VersionMarker;
use crate::{Key, Value};

/// Successful terminal outcome of a destroy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Entry fully gone, no tombstone needed
    Removed,

    /// Entry converted to (or refreshed as) a tombstone
    Tombstoned,

    /// Already applied, or lost to a newer version; nothing changed
    Replay,

    /// Soft failure; the caller decides whether to retry or skip
    Suppressed(SuppressReason),
}

/// Why a destroy was dropped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppressReason {
    /// An eviction lost its eligibility race
    Eviction,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Removed => write!(f, "removed"),
            Outcome::Tombstoned => write!(f, "tombstoned"),
            Outcome::Replay => write!(f, "replay"),
            Outcome::Suppressed(SuppressReason::Eviction) => write!(f, "suppressed (eviction)"),
        }
    }
}

/// The command driving one destroy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyRequest {
    pub key: Key,

    /// Conditional destroy: only remove if the live value equals this
    pub expected_old_value: Option<Value>,

    /// Version marker carried by the request (remote or recovered operations)
    pub marker: Option<VersionMarker>,

    /// Driven by capacity eviction rather than user intent
    pub is_eviction: bool,

    /// Arrived through replication rather than the local API
    pub is_remote_origin: bool,

    /// Arrived through a gateway; always convergence-relevant
    pub gateway_tagged: bool,

    /// The region is receiving an initial bulk transfer
    pub in_bulk_load_mode: bool,

    /// Suppress listener notification while the initial transfer runs
    pub during_initial_transfer: bool,

    /// Replayed from the persistence log
    pub recovering_from_persistent_log: bool,
}

impl DestroyRequest {
    fn new(key: Key) -> Self {
        Self {
            key,
            expected_old_value: None,
            marker: None,
            is_eviction: false,
            is_remote_origin: false,
            gateway_tagged: false,
            in_bulk_load_mode: false,
            during_initial_transfer: false,
            recovering_from_persistent_log: false,
        }
    }

    /// A destroy issued through the local API
    pub fn local(key: impl Into<Key>) -> Self {
        Self::new(key.into())
    }

    /// An eviction-driven destroy
    pub fn eviction(key: impl Into<Key>) -> Self {
        Self {
            is_eviction: true,
            ..Self::new(key.into())
        }
    }

    /// A destroy replicated from another member
    pub fn remote(key: impl Into<Key>, marker: VersionMarker) -> Self {
        Self {
            marker: Some(marker),
            is_remote_origin: true,
            ..Self::new(key.into())
        }
    }

    /// A destroy replayed from the persistence log
    pub fn recovered(key: impl Into<Key>, marker: Option<VersionMarker>) -> Self {
        Self {
            marker,
            recovering_from_persistent_log: true,
            ..Self::new(key.into())
        }
    }

    /// Only destroy if the live value equals `value`
    pub fn expect_value(mut self, value: impl Into<Value>) -> Self {
        self.expected_old_value = Some(value.into());
        self
    }

    /// Attach an explicit version marker
    pub fn with_marker(mut self, marker: VersionMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Mark as gateway-originated
    pub fn from_gateway(mut self) -> Self {
        self.gateway_tagged = true;
        self
    }

    pub fn bulk_load(mut self, enabled: bool) -> Self {
        self.in_bulk_load_mode = enabled;
        self
    }

    pub fn initial_transfer(mut self, enabled: bool) -> Self {
        self.during_initial_transfer = enabled;
        self
    }
}
