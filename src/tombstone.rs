//! Tombstone retention schedule
//!
//! Tracks when each tombstone becomes eligible for garbage collection. The
//! sweeper only decides *which* keys are due; the region purges them under
//! the slot lock, and only if the tombstone still carries the scheduled marker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::version::VersionMarker;
use crate::Key;

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    marker: VersionMarker,
    deadline: Instant,
}

/// Retention schedule for tombstones
///
/// Schedules are made after the slot lock is released, so two schedules for
/// one key can arrive out of order; the greater marker always wins.
#[derive(Debug, Default)]
pub struct TombstoneSweeper {
    scheduled: Mutex<HashMap<Key, Scheduled>>,
}

impl TombstoneSweeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or reschedule) the tombstone for `key` carrying `marker`
    pub fn schedule(&self, key: Key, marker: VersionMarker, retention: Duration) {
        let deadline = Instant::now() + retention;
        let mut scheduled = self.scheduled.lock();
        match scheduled.get_mut(&key) {
            Some(existing) if existing.marker > marker => {}
            Some(existing) => *existing = Scheduled { marker, deadline },
            None => {
                scheduled.insert(key, Scheduled { marker, deadline });
            }
        }
    }

    /// Cancel the schedule for `key` unless a newer tombstone was scheduled
    /// since `marker`. Returns true if a schedule was removed.
    pub fn cancel(&self, key: &Key, marker: &VersionMarker) -> bool {
        let mut scheduled = self.scheduled.lock();
        match scheduled.get(key) {
            Some(existing) if existing.marker <= *marker => {
                scheduled.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Remove and return every schedule whose deadline is at or before `now`
    pub fn due(&self, now: Instant) -> Vec<(Key, VersionMarker)> {
        let mut scheduled = self.scheduled.lock();
        let due: Vec<(Key, VersionMarker)> = scheduled
            .iter()
            .filter(|(_, s)| s.deadline <= now)
            .map(|(key, s)| (key.clone(), s.marker))
            .collect();

        for (key, _) in &due {
            scheduled.remove(key);
        }
        due
    }

    /// Marker currently scheduled for `key`
    pub fn scheduled_marker(&self, key: &Key) -> Option<VersionMarker> {
        self.scheduled.lock().get(key).map(|s| s.marker)
    }

    /// Number of scheduled tombstones
    pub fn len(&self) -> usize {
        self.scheduled.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.lock().is_empty()
    }

    /// Forget every schedule (region clear)
    pub fn clear(&self) {
        self.scheduled.lock().clear();
    }
}
