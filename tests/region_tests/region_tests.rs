//! Tests for the Region facade
//!
//! These tests verify:
//! - Put outcomes and reads
//! - Tombstone expiry, and that resurrection cancels a pending sweep
//! - Reopening from the persistence log restores entries and tombstones
//! - The background sweeper thread
//! - Config validation, stats and the channel listener

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use regionkv::config::LogSyncStrategy;
use regionkv::entry::SlotState;
use regionkv::notify::{ChannelListener, ListenerEvent, RegionListener};
use regionkv::oplog::LogRecovery;
use regionkv::{
    Collaborators, DestroyError, Key, MemberId, Outcome, PutOutcome, Region, RegionConfig,
    RegionError, VersionMarker,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open(config: RegionConfig) -> Region {
    Region::open(config, Collaborators::new()).unwrap()
}

fn checked_region(tombstone_timeout: Duration) -> Region {
    open(
        RegionConfig::builder()
            .concurrency_checks(true)
            .tombstone_timeout(tombstone_timeout)
            .build(),
    )
}

fn logged_config(path: &std::path::Path) -> RegionConfig {
    RegionConfig::builder()
        .member_id(MemberId(1))
        .concurrency_checks(true)
        .log_path(path)
        .log_sync_strategy(LogSyncStrategy::EveryWrite)
        .recovered_tombstone_timeout(Duration::from_secs(3600))
        .build()
}

fn remote(ts: u64) -> VersionMarker {
    VersionMarker::new(MemberId(2), ts, ts)
}

// =============================================================================
// Put and Get
// =============================================================================

#[test]
fn test_put_and_get() {
    let region = open(RegionConfig::default());

    assert_eq!(region.put("k", "v1"), PutOutcome::Created);
    assert_eq!(region.put("k", "v2"), PutOutcome::Updated);

    assert_eq!(region.get(b"k"), Some(Bytes::from_static(b"v2")));
    assert!(region.get(b"missing").is_none());
    assert_eq!(region.len(), 1);
    assert!(!region.is_empty());
}

#[test]
fn test_put_after_tombstone_is_created() {
    let region = checked_region(Duration::from_secs(600));
    region.put("k", "v1");
    region.remove("k").unwrap();

    assert_eq!(region.put("k", "v2"), PutOutcome::Created);
    assert_eq!(region.get(b"k"), Some(Bytes::from_static(b"v2")));
}

#[test]
fn test_local_put_after_remote_tombstone_keeps_ordering() {
    let region = open(RegionConfig::default());
    region.put("k", "v1");
    assert_eq!(
        region.apply_remote_destroy("k", remote(20)),
        Ok(Outcome::Tombstoned)
    );

    assert_eq!(region.put("k", "v2"), PutOutcome::Created);
    let version = region.entry(b"k").unwrap().version.unwrap();
    assert!(version > remote(20));

    // An older destroy arriving late loses against the local put
    assert_eq!(region.apply_remote_destroy("k", remote(10)), Ok(Outcome::Replay));
    assert_eq!(region.get(b"k"), Some(Bytes::from_static(b"v2")));
    assert_eq!(region.entry(b"k").unwrap().version, Some(version));
}

#[test]
fn test_unversioned_local_put_stays_unversioned() {
    let region = open(RegionConfig::default());
    region.put("k", "v1");
    region.put("k", "v2");

    assert!(region.entry(b"k").unwrap().version.is_none());
}

#[test]
fn test_remote_put_replay_and_superseded() {
    let region = open(RegionConfig::default());

    assert_eq!(region.apply_remote_put("k", "v", remote(5)), PutOutcome::Created);
    assert_eq!(region.apply_remote_put("k", "v", remote(5)), PutOutcome::Replay);
    assert_eq!(
        region.apply_remote_put("k", "older", remote(3)),
        PutOutcome::Superseded
    );
    assert_eq!(region.get(b"k"), Some(Bytes::from_static(b"v")));
    assert_eq!(region.stats().version_conflicts, 1);
}

#[test]
fn test_bulk_put_respects_newer_versions() {
    let region = open(RegionConfig::default());
    region.begin_bulk_load();
    assert!(region.is_bulk_loading());

    region.apply_remote_put("k", "live", remote(10));
    assert_eq!(region.bulk_put("k", "snapshot", Some(remote(4))), PutOutcome::Superseded);
    assert_eq!(region.bulk_put("fresh", "snapshot", None), PutOutcome::Created);

    assert_eq!(region.finish_bulk_load(), 0);
    assert_eq!(region.get(b"k"), Some(Bytes::from_static(b"live")));
    assert_eq!(region.get(b"fresh"), Some(Bytes::from_static(b"snapshot")));
}

// =============================================================================
// Tombstone Expiry
// =============================================================================

#[test]
fn test_expire_tombstones_after_retention() {
    let region = checked_region(Duration::from_millis(0));
    region.put("k", "v");
    assert_eq!(region.remove("k"), Ok(Outcome::Tombstoned));
    assert_eq!(region.tombstone_count(), 1);

    let expired = region.expire_tombstones(Instant::now() + Duration::from_millis(1));

    assert_eq!(expired, 1);
    assert!(region.entry(b"k").is_none());
    assert_eq!(region.stats().tombstones_expired, 1);
}

#[test]
fn test_expire_tombstones_before_deadline_keeps_them() {
    let region = checked_region(Duration::from_secs(600));
    region.put("k", "v");
    region.remove("k").unwrap();

    assert_eq!(region.expire_tombstones(Instant::now()), 0);
    assert!(region.entry(b"k").unwrap().state.is_tombstone());
}

#[test]
fn test_resurrection_cancels_sweep() {
    let region = checked_region(Duration::from_millis(0));
    region.put("k", "v1");
    region.remove("k").unwrap();
    assert!(region.scheduled_tombstone(b"k").is_some());

    region.put("k", "v2");

    assert!(region.scheduled_tombstone(b"k").is_none());
    assert_eq!(region.expire_tombstones(Instant::now() + Duration::from_secs(1)), 0);
    assert_eq!(region.get(b"k"), Some(Bytes::from_static(b"v2")));
}

#[test]
fn test_refreshed_tombstone_expires_once() {
    let region = open(
        RegionConfig::builder()
            .tombstone_timeout(Duration::from_millis(0))
            .build(),
    );
    region.apply_remote_destroy("k", remote(1)).unwrap();
    region.apply_remote_destroy("k", remote(2)).unwrap();

    assert_eq!(region.scheduled_tombstone(b"k"), Some(remote(2)));
    assert_eq!(region.expire_tombstones(Instant::now() + Duration::from_secs(1)), 1);
    assert_eq!(region.slot_count(), 0);
}

#[test]
fn test_background_sweeper_expires_tombstones() {
    let region = Arc::new(checked_region(Duration::from_millis(5)));
    region.put("k", "v");
    region.remove("k").unwrap();

    let handle = region
        .start_tombstone_sweeper(Duration::from_millis(5))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while region.tombstone_count() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    handle.stop();

    assert_eq!(region.tombstone_count(), 0);
    assert_eq!(region.slot_count(), 0);
}

#[test]
fn test_sweeper_stops_when_handle_dropped() {
    let region = Arc::new(open(RegionConfig::default()));
    let handle = region
        .start_tombstone_sweeper(Duration::from_millis(1))
        .unwrap();
    drop(handle);

    // The thread held only a weak reference
    assert_eq!(Arc::strong_count(&region), 1);
}

// =============================================================================
// Persistence and Recovery
// =============================================================================

#[test]
fn test_reopen_restores_entries_and_tombstones() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("region.log");

    let tombstone_marker = {
        let region = open(logged_config(&path));
        region.put("kept", "1");
        region.put("updated", "old");
        region.put("updated", "new");
        region.put("deleted", "x");
        region.remove("deleted").unwrap();
        region.close().unwrap();
        region.entry(b"deleted").unwrap().version.unwrap()
    };

    let region = open(logged_config(&path));

    assert_eq!(region.get(b"kept"), Some(Bytes::from_static(b"1")));
    assert_eq!(region.get(b"updated"), Some(Bytes::from_static(b"new")));
    assert_eq!(
        region.entry(b"deleted").unwrap().state,
        SlotState::Tombstone(tombstone_marker)
    );
    assert_eq!(region.scheduled_tombstone(b"deleted"), Some(tombstone_marker));

    // New local markers order after everything recovered
    region.put("deleted", "back");
    assert!(region.entry(b"deleted").unwrap().version.unwrap() > tombstone_marker);
}

#[test]
fn test_reopen_after_clear_is_empty() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("region.log");

    {
        let region = open(logged_config(&path));
        region.put("a", "1");
        region.put("b", "2");
        region.clear();
        region.put("c", "3");
        region.close().unwrap();
    }

    let region = open(logged_config(&path));
    assert!(region.get(b"a").is_none());
    assert!(region.get(b"b").is_none());
    assert_eq!(region.get(b"c"), Some(Bytes::from_static(b"3")));
    assert_eq!(region.len(), 1);
}

#[test]
fn test_reopen_does_not_duplicate_log() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("region.log");

    {
        let region = open(logged_config(&path));
        region.put("a", "1");
        region.close().unwrap();
    }
    let len = std::fs::metadata(&path).unwrap().len();

    {
        let region = open(logged_config(&path));
        region.close().unwrap();
    }

    // Replay itself is never logged again
    assert_eq!(std::fs::metadata(&path).unwrap().len(), len);
}

/// Rewrites a key from inside the destroy callback for it
#[derive(Default)]
struct RewriteOnDestroy {
    region: Mutex<Weak<Region>>,
}

impl RegionListener for RewriteOnDestroy {
    fn after_destroy(&self, key: &Key, _outcome: Outcome) {
        if let Some(region) = self.region.lock().upgrade() {
            region.put(key.clone(), "v2");
        }
    }
}

#[test]
fn test_reentrant_put_during_destroy_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("region.log");
    let config = || {
        RegionConfig::builder()
            .concurrency_checks(false)
            .log_path(&path)
            .log_sync_strategy(LogSyncStrategy::EveryWrite)
            .build()
    };

    {
        let listener = Arc::new(RewriteOnDestroy::default());
        let region = Arc::new(
            Region::open(config(), Collaborators::new().with_listener(listener.clone())).unwrap(),
        );
        *listener.region.lock() = Arc::downgrade(&region);

        region.put("k", "v1");
        assert_eq!(region.remove("k"), Ok(Outcome::Removed));
        assert_eq!(region.get(b"k"), Some(Bytes::from_static(b"v2")));
        region.close().unwrap();
    }

    // The callback's put was appended before the destroy that triggered it
    let (records, _) = LogRecovery::recover(&path).unwrap();
    assert_eq!(records.iter().map(|r| r.lsn).collect::<Vec<_>>(), vec![1, 3, 2]);

    let region = open(config());
    assert_eq!(region.get(b"k"), Some(Bytes::from_static(b"v2")));
}

#[test]
fn test_reopen_with_partial_tail() {
    use std::io::Write;

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("region.log");
    {
        let region = open(logged_config(&path));
        region.put("a", "1");
        region.close().unwrap();
    }
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; 7]).unwrap();
    }

    let region = open(logged_config(&path));
    assert_eq!(region.get(b"a"), Some(Bytes::from_static(b"1")));
    region.put("b", "2");
    region.close().unwrap();

    let region = open(logged_config(&path));
    assert_eq!(region.len(), 2);
}

// =============================================================================
// Config, Stats and Listeners
// =============================================================================

#[test]
fn test_invalid_config_rejected() {
    let config = RegionConfig::builder().shard_count(0).build();
    assert!(matches!(
        Region::open(config, Collaborators::new()),
        Err(RegionError::Config(_))
    ));

    let config = RegionConfig::builder()
        .log_sync_strategy(LogSyncStrategy::EveryNEntries { count: 0 })
        .build();
    assert!(matches!(
        Region::open(config, Collaborators::new()),
        Err(RegionError::Config(_))
    ));
}

#[test]
fn test_stats_track_outcomes() {
    let region = open(RegionConfig::default());
    region.put("a", "1");
    region.put("b", "2");

    let _ = region.remove("a");
    let _ = region.remove("missing");
    let _ = region.remove_if_equals("b", "nope");
    let _ = region.apply_remote_destroy("b", remote(1));
    let _ = region.apply_remote_destroy("b", remote(1));
    region.clear();

    let stats = region.stats();
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.not_found, 1);
    assert_eq!(stats.conditional_mismatches, 1);
    assert_eq!(stats.tombstoned, 1);
    assert_eq!(stats.replays, 1);
    assert_eq!(stats.clears, 1);
    assert_eq!(stats.log_failures, 0);
}

#[test]
fn test_channel_listener_receives_events() {
    let (listener, events) = ChannelListener::new();
    let region = Region::open(
        RegionConfig::default(),
        Collaborators::new().with_listener(Arc::new(listener)),
    )
    .unwrap();

    region.put("k", "v");
    region.remove("k").unwrap();
    assert_eq!(region.remove("k"), Err(DestroyError::NotFound));
    region.clear();

    assert_eq!(
        events.try_recv().unwrap(),
        ListenerEvent::Destroyed {
            key: Bytes::from_static(b"k"),
            outcome: Outcome::Removed,
        }
    );
    assert_eq!(events.try_recv().unwrap(), ListenerEvent::Cleared);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_unlink_removed_on_quiet_region_is_noop() {
    let region = open(RegionConfig::default());
    region.put("k", "v");
    region.remove("k").unwrap();

    // The destroy already unlinked its slot
    assert_eq!(region.unlink_removed(), 0);
    assert_eq!(region.slot_count(), 0);
}
