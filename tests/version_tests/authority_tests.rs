//! Tests for the VersionAuthority
//!
//! These tests verify:
//! - `decide` classification: replay, newer, conflict and unversioned cases
//! - Generated markers order after what they were decided against
//! - Observed markers advance the local clock

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use regionkv::version::{ConflictReason, Decision, VersionAuthority};
use regionkv::{MemberId, VersionMarker};

fn key() -> Bytes {
    Bytes::from_static(b"k")
}

// =============================================================================
// Decide
// =============================================================================

#[test]
fn test_decide_equal_is_replay() {
    let marker = VersionMarker::new(MemberId(1), 4, 100);
    assert_eq!(
        VersionAuthority::decide(Some(&marker), Some(&marker)),
        Decision::Replay
    );
}

#[test]
fn test_decide_newer_timestamp_wins() {
    let current = VersionMarker::new(MemberId(2), 9, 100);
    let incoming = VersionMarker::new(MemberId(1), 1, 101);
    assert_eq!(
        VersionAuthority::decide(Some(&incoming), Some(&current)),
        Decision::Newer
    );
}

#[test]
fn test_decide_older_from_other_member_is_timestamp_conflict() {
    let current = VersionMarker::new(MemberId(2), 1, 200);
    let incoming = VersionMarker::new(MemberId(1), 50, 150);
    assert_eq!(
        VersionAuthority::decide(Some(&incoming), Some(&current)),
        Decision::Conflict(ConflictReason::OlderTimestamp)
    );
}

#[test]
fn test_decide_older_from_same_member_is_stale_version() {
    let current = VersionMarker::new(MemberId(3), 8, 200);
    let incoming = VersionMarker::new(MemberId(3), 7, 200);
    assert_eq!(
        VersionAuthority::decide(Some(&incoming), Some(&current)),
        Decision::Conflict(ConflictReason::StaleRegionVersion)
    );
}

#[test]
fn test_decide_member_breaks_timestamp_tie() {
    let low = VersionMarker::new(MemberId(1), 5, 300);
    let high = VersionMarker::new(MemberId(2), 1, 300);

    assert_eq!(VersionAuthority::decide(Some(&high), Some(&low)), Decision::Newer);
    assert_eq!(
        VersionAuthority::decide(Some(&low), Some(&high)),
        Decision::Conflict(ConflictReason::OlderTimestamp)
    );
}

#[test]
fn test_decide_unversioned_sides_are_newer() {
    let marker = VersionMarker::new(MemberId(1), 1, 1);
    assert_eq!(VersionAuthority::decide(None, Some(&marker)), Decision::Newer);
    assert_eq!(VersionAuthority::decide(Some(&marker), None), Decision::Newer);
    assert_eq!(VersionAuthority::decide(None, None), Decision::Newer);
}

// =============================================================================
// Generate and Observe
// =============================================================================

#[test]
fn test_generated_markers_increase() {
    let authority = VersionAuthority::new(MemberId(1));
    let first = authority.generate_marker_for(&key(), None);
    let second = authority.generate_marker_for(&key(), None);

    assert_eq!(first.member, MemberId(1));
    assert!(second > first);
    assert!(second.region_version > first.region_version);
    assert_eq!(authority.current_region_version(), second.region_version);
}

#[test]
fn test_generated_marker_orders_after_observed_slot_marker() {
    let authority = VersionAuthority::new(MemberId(1));
    let far_future = VersionMarker::new(MemberId(9), 1, u64::MAX / 2);

    let generated = authority.generate_marker_for(&key(), Some(&far_future));

    assert!(generated > far_future);
    assert_eq!(
        VersionAuthority::decide(Some(&generated), Some(&far_future)),
        Decision::Newer
    );
}

#[test]
fn test_observe_advances_clock_and_own_region_version() {
    let authority = VersionAuthority::new(MemberId(4));
    let remote = VersionMarker::new(MemberId(7), 500, u64::MAX / 4);
    let own = VersionMarker::new(MemberId(4), 42, 10);

    authority.observe(&remote);
    authority.observe(&own);

    // Other members' versions don't touch our counter
    assert_eq!(authority.current_region_version(), 42);

    let next = authority.generate_marker_for(&key(), None);
    assert!(next > remote);
    assert_eq!(next.region_version, 43);
}

#[test]
fn test_concurrent_generation_is_unique() {
    let authority = Arc::new(VersionAuthority::new(MemberId(1)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let authority = Arc::clone(&authority);
            thread::spawn(move || {
                (0..500)
                    .map(|_| authority.generate_marker_for(&key(), None))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for marker in handle.join().unwrap() {
            assert!(seen.insert(marker), "duplicate marker {}", marker);
        }
    }
    assert_eq!(seen.len(), 4000);
}

#[test]
fn test_marker_display() {
    let marker = VersionMarker::new(MemberId(3), 7, 42);
    assert_eq!(marker.to_string(), "member-3:v7@42");
}
