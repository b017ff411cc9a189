//! Notify Module
//!
//! Contracts for the collaborators a destroy reports to, and the notifier
//! that fans a committed outcome out to them.
//!
//! ## Rule
//! Nothing in this module is ever invoked while a slot lock is held. The
//! only exception is [`EvictionController::is_still_eligible`], which is
//! consulted under the lock and must not call back into the region.
//!
//! ## Collaborators
//! - [`EvictionController`]: eligibility re-check, removal accounting
//! - [`IndexManager`]: quiesce token, mapping removal
//! - [`ReplicationSink`]: fan-out of local destroys, timestamp propagation
//! - [`RegionListener`]: user callbacks
//! - persistence log (`oplog::LogWriter`), owned by the notifier

mod channel;
mod notifier;

pub use channel::{ChannelListener, ListenerEvent};
pub use notifier::{PostRemovalNotifier, QuiesceGuard};

use std::sync::Arc;

use crate::destroy::Outcome;
use crate::version::VersionMarker;
use crate::{Key, Value};

/// Eviction bookkeeping
pub trait EvictionController: Send + Sync {
    /// Re-check, under the slot lock, that `key` holding `value` may still be
    /// evicted. Must be fast and must not touch the region.
    fn is_still_eligible(&self, key: &Key, value: &Value) -> bool;

    /// A live entry was removed outright
    fn notify_removed(&self, key: &Key);

    /// A live entry became a tombstone
    fn notify_tombstoned(&self, key: &Key);
}

/// Secondary index hooks
pub trait IndexManager: Send + Sync {
    /// Block index initialization while a destroy mutates an entry
    fn quiesce_begin(&self);

    /// Release the token taken by `quiesce_begin`
    fn quiesce_end(&self);

    /// Drop index mappings for a removed key
    fn remove_mapping(&self, key: &Key);
}

/// Replication / gateway fan-out
pub trait ReplicationSink: Send + Sync {
    /// Ship a locally originated destroy to other members
    fn distribute(&self, event: &RemovalEvent);

    /// A conflicting operation lost, but its marker still has to reach the
    /// other members so their clocks converge
    fn notify_timestamp_update(&self, key: &Key, marker: &VersionMarker);
}

/// User-level callbacks
pub trait RegionListener: Send + Sync {
    fn after_destroy(&self, key: &Key, outcome: Outcome);

    fn after_clear(&self) {}
}

/// A committed destroy, as reported after the slot lock is released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalEvent {
    pub key: Key,

    /// `Removed` or `Tombstoned`
    pub outcome: Outcome,

    /// The live value the destroy removed, if there was one
    pub old_value: Option<Value>,

    /// Marker recorded on the tombstone (or carried by the request)
    pub marker: Option<VersionMarker>,

    pub is_remote_origin: bool,
    pub is_eviction: bool,

    /// Ship to other members: local, non-eviction, not replayed from the log
    pub distribute: bool,

    /// False during initial transfer: listeners are skipped
    pub notify_listeners: bool,

    /// LSN reserved under the slot lock; `None` while replaying the
    /// persistence log or when no log is attached
    pub lsn: Option<u64>,
}

/// The set of collaborators a region reports to
#[derive(Clone, Default)]
pub struct Collaborators {
    pub eviction: Option<Arc<dyn EvictionController>>,
    pub index: Option<Arc<dyn IndexManager>>,
    pub replication: Option<Arc<dyn ReplicationSink>>,
    pub listeners: Vec<Arc<dyn RegionListener>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eviction(mut self, eviction: Arc<dyn EvictionController>) -> Self {
        self.eviction = Some(eviction);
        self
    }

    pub fn with_index(mut self, index: Arc<dyn IndexManager>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_replication(mut self, replication: Arc<dyn ReplicationSink>) -> Self {
        self.replication = Some(replication);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn RegionListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}
