//! Entry table implementation
//!
//! Sharded key -> slot map with atomic insert-if-absent and
//! compare-and-remove.

use std::collections::hash_map::{Entry, RandomState};
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::Key;

use super::EntrySlot;

type Shard = RwLock<HashMap<Key, Arc<EntrySlot>>>;

/// Concurrent map from key to entry slot
///
/// ## Concurrency:
/// - `shards`: each map operation takes one shard lock for its own duration
///   only; no slot lock is ever acquired while a shard lock is held
/// - `generation`: bumped by `clear()`; slots remember the generation they
///   were created in
/// - `modification`: the region modification token. Operations hold it
///   shared from locate through slot lock acquisition; `clear()` holds it
///   exclusively
pub struct EntryTable {
    shards: Box<[Shard]>,
    hasher: RandomState,
    generation: AtomicU64,
    modification: RwLock<()>,
}

impl EntryTable {
    /// Create an empty table with `shard_count` shards (at least one)
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher: RandomState::new(),
            generation: AtomicU64::new(0),
            modification: RwLock::new(()),
        }
    }

    /// Look up a slot without taking its lock.
    ///
    /// The returned slot may already be stale; callers decide under the
    /// slot lock.
    pub fn get(&self, key: &Key) -> Option<Arc<EntrySlot>> {
        self.shard(key).read().get(key).cloned()
    }

    /// Install `placeholder` unless the key is present.
    ///
    /// Returns the existing slot if there was one (the placeholder is then
    /// dropped), `None` if the placeholder is now visible.
    pub fn insert_if_absent(&self, key: &Key, placeholder: Arc<EntrySlot>) -> Option<Arc<EntrySlot>> {
        let mut shard = self.shard(key).write();
        match shard.entry(key.clone()) {
            Entry::Occupied(existing) => Some(Arc::clone(existing.get())),
            Entry::Vacant(vacant) => {
                vacant.insert(placeholder);
                None
            }
        }
    }

    /// Find the slot for `key`, installing a placeholder if absent.
    ///
    /// Returns the slot and whether this call installed it. Callers hold the
    /// modification token so the placeholder's generation is current.
    pub fn locate_or_install(&self, key: &Key) -> (Arc<EntrySlot>, bool) {
        if let Some(existing) = self.get(key) {
            return (existing, false);
        }

        let placeholder = Arc::new(EntrySlot::placeholder(key.clone(), self.generation()));
        match self.insert_if_absent(key, Arc::clone(&placeholder)) {
            Some(existing) => (existing, false),
            None => (placeholder, true),
        }
    }

    /// Remove `key` only if it still maps to `expected` (by identity).
    pub fn remove_if(&self, key: &Key, expected: &Arc<EntrySlot>) -> bool {
        let mut shard = self.shard(key).write();
        match shard.get(key) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                shard.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Shared modification token; blocks while a clear is running
    pub fn modification_token(&self) -> RwLockReadGuard<'_, ()> {
        self.modification.read()
    }

    /// Current clear generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Drop every slot and bump the generation. Returns the number of slots
    /// dropped.
    pub fn clear(&self) -> usize {
        self.clear_with(|| ()).0
    }

    /// Like [`EntryTable::clear`], running `under_token` after the
    /// generation bump while the modification token is still held
    /// exclusively.
    ///
    /// No operation can locate a slot of the new generation before
    /// `under_token` returns.
    pub fn clear_with<T>(&self, under_token: impl FnOnce() -> T) -> (usize, T) {
        let _token = self.modification.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        let value = under_token();

        let cleared = self
            .shards
            .iter()
            .map(|shard| {
                let mut shard = shard.write();
                let count = shard.len();
                shard.clear();
                count
            })
            .sum::<usize>();
        (cleared, value)
    }

    /// Background unlink pass: erase `Removed` slots nobody references.
    ///
    /// Tombstones are never touched here; only the retention sweep purges them.
    pub fn unlink_removed(&self) -> usize {
        let mut unlinked = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            let before = shard.len();
            shard.retain(|_, slot| !(slot.is_removed() && Arc::strong_count(slot) == 1));
            unlinked += before - shard.len();
        }
        unlinked
    }

    /// Number of slots in the table (any state)
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Snapshot of all slots currently in the table
    pub fn slots(&self) -> Vec<Arc<EntrySlot>> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &Key) -> &Shard {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }
}
