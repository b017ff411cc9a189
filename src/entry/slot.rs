//! Entry slot implementation
//!
//! One key's mutable state, guarded by its own mutex.

use std::cell::Cell;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::version::VersionMarker;
use crate::{Key, Value};

use super::SlotState;

thread_local! {
    /// Slot locks held by the current thread. Lets collaborators assert they
    /// are never invoked with a slot lock held.
    static SLOT_LOCKS_HELD: Cell<usize> = const { Cell::new(0) };
}

/// Number of slot locks the calling thread currently holds
pub fn slot_locks_held() -> usize {
    SLOT_LOCKS_HELD.with(|held| held.get())
}

/// A single key's state holder
///
/// ## Concurrency:
/// - `data`: the per-slot lock; every authoritative decision happens under it
/// - `removed`: set (Release) under the lock when the slot becomes `Removed`,
///   readable without the lock (Acquire) by table sweeps
/// - `generation`: immutable, the table generation the slot was created in
pub struct EntrySlot {
    key: Key,
    generation: u64,
    removed: AtomicBool,
    data: Mutex<SlotData>,
}

/// State protected by the slot lock
#[derive(Debug)]
pub struct SlotData {
    state: SlotState,

    /// Last known marker; equals the tombstone's marker in `Tombstone`
    version: Option<VersionMarker>,

    /// Placeholder kept as a provisional removal marker during bulk load
    provisional: bool,
}

/// Point-in-time copy of a slot, for callers outside the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub key: Key,
    pub state: SlotState,
    pub version: Option<VersionMarker>,
}

impl EntrySlot {
    /// Create a placeholder slot for `key` in table generation `generation`
    pub fn placeholder(key: Key, generation: u64) -> Self {
        Self {
            key,
            generation,
            removed: AtomicBool::new(false),
            data: Mutex::new(SlotData {
                state: SlotState::RemovingPlaceholder,
                version: None,
                provisional: false,
            }),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Table generation this slot was created in
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fenced check for the `Removed` state, no lock taken
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Acquire the slot lock
    pub fn lock(&self) -> SlotGuard<'_> {
        SlotGuard::new(self, self.data.lock())
    }

    /// Acquire the slot lock if it is free
    pub fn try_lock(&self) -> Option<SlotGuard<'_>> {
        self.data.try_lock().map(|data| SlotGuard::new(self, data))
    }

    /// Copy the slot's state under a short lock
    pub fn snapshot(&self) -> SlotSnapshot {
        let guard = self.lock();
        SlotSnapshot {
            key: self.key.clone(),
            state: guard.state().clone(),
            version: guard.version(),
        }
    }
}

impl SlotData {
    pub fn state(&self) -> &SlotState {
        &self.state
    }

    pub fn version(&self) -> Option<VersionMarker> {
        self.version
    }

    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    /// The live value, if any
    pub fn live_value(&self) -> Option<&Value> {
        match &self.state {
            SlotState::Live(value) => Some(value),
            _ => None,
        }
    }
}

/// Held slot lock. Mutations go through the guard so the `removed` fence and
/// the lock instrumentation stay consistent with the state.
pub struct SlotGuard<'a> {
    slot: &'a EntrySlot,
    data: MutexGuard<'a, SlotData>,
}

impl<'a> SlotGuard<'a> {
    fn new(slot: &'a EntrySlot, data: MutexGuard<'a, SlotData>) -> Self {
        SLOT_LOCKS_HELD.with(|held| held.set(held.get() + 1));
        Self { slot, data }
    }

    pub fn slot(&self) -> &EntrySlot {
        self.slot
    }

    /// Store a live value, returning the previous state
    pub fn set_live(&mut self, value: Value, version: Option<VersionMarker>) -> SlotState {
        self.data.provisional = false;
        self.data.version = version;
        std::mem::replace(&mut self.data.state, SlotState::Live(value))
    }

    /// Convert to (or refresh) a tombstone, returning the previous state
    pub fn set_tombstone(&mut self, marker: VersionMarker) -> SlotState {
        self.data.provisional = false;
        self.data.version = Some(marker);
        std::mem::replace(&mut self.data.state, SlotState::Tombstone(marker))
    }

    /// Keep a placeholder as a provisional removal marker
    pub fn retain_provisional(&mut self) {
        debug_assert_eq!(self.data.state, SlotState::RemovingPlaceholder);
        self.data.provisional = true;
    }

    /// Move to `Removed` and publish the fence, returning the previous state
    pub fn mark_removed(&mut self) -> SlotState {
        self.data.provisional = false;
        let previous = std::mem::replace(&mut self.data.state, SlotState::Removed);
        self.slot.removed.store(true, Ordering::Release);
        previous
    }
}

impl Deref for SlotGuard<'_> {
    type Target = SlotData;

    fn deref(&self) -> &SlotData {
        &self.data
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        SLOT_LOCKS_HELD.with(|held| held.set(held.get().saturating_sub(1)));
    }
}
