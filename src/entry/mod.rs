//! Entry Module
//!
//! Per-key state holders and the concurrent table that owns them.
//!
//! ## Responsibilities
//! - Model one key's state as an explicit sum type
//! - Provide the per-slot lock (the only lock a destroy holds)
//! - Atomic insert-if-absent and compare-and-remove on the table
//! - Track the region clear generation
//!
//! ## Data Structure Choice
//! Sharded `HashMap`s behind `parking_lot::RwLock`s:
//! - Table locks are held only for a single map operation, never across a
//!   slot lock acquisition
//! - Slots are `Arc`-shared so a caller can keep working on a slot the table
//!   has already dropped (it will notice through the generation or the
//!   `removed` fence and retry)

mod slot;
mod table;

pub use slot::{slot_locks_held, EntrySlot, SlotData, SlotGuard, SlotSnapshot};
pub use table::EntryTable;

use crate::version::VersionMarker;
use crate::Value;

/// State of a single key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// A live value
    Live(Value),

    /// Claimed by an in-flight operation, or retained as a provisional
    /// removal during bulk load. Holds no value.
    RemovingPlaceholder,

    /// Gone; the slot is (or is about to be) unlinked from the table
    Removed,

    /// Deleted key retained with its version for conflict detection
    Tombstone(VersionMarker),
}

impl SlotState {
    pub fn is_live(&self) -> bool {
        matches!(self, SlotState::Live(_))
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, SlotState::Tombstone(_))
    }
}
