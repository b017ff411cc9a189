//! Convergence tests for replicated destroys
//!
//! These tests verify:
//! - Every delivery order of the same operations ends in the same slot state
//! - Concurrent remote destroys leave the greatest marker
//! - Two members exchanging their operations converge

use std::sync::{Arc, Barrier};
use std::thread;

use bytes::Bytes;
use parking_lot::Mutex;
use regionkv::entry::SlotState;
use regionkv::notify::{RemovalEvent, ReplicationSink};
use regionkv::{
    Collaborators, Key, MemberId, Outcome, PutOutcome, Region, RegionConfig, VersionMarker,
};

#[derive(Debug, Clone)]
enum RemoteOp {
    Put(&'static str, VersionMarker),
    Destroy(VersionMarker),
}

fn marker(member: u32, ts: u64) -> VersionMarker {
    VersionMarker::new(MemberId(member), ts, ts)
}

fn region(member: u32, concurrency_checks: bool) -> Region {
    let config = RegionConfig::builder()
        .member_id(MemberId(member))
        .concurrency_checks(concurrency_checks)
        .build();
    Region::open(config, Collaborators::new()).unwrap()
}

fn apply(region: &Region, op: &RemoteOp) {
    match op {
        RemoteOp::Put(value, marker) => {
            region.apply_remote_put("k", *value, *marker);
        }
        RemoteOp::Destroy(marker) => {
            let _ = region.apply_remote_destroy("k", *marker);
        }
    }
}

/// All orderings of `ops` (Heap's algorithm)
fn permutations(ops: &[RemoteOp]) -> Vec<Vec<RemoteOp>> {
    fn heap(k: usize, ops: &mut Vec<RemoteOp>, out: &mut Vec<Vec<RemoteOp>>) {
        if k <= 1 {
            out.push(ops.clone());
            return;
        }
        heap(k - 1, ops, out);
        for i in 0..k - 1 {
            if k % 2 == 0 {
                ops.swap(i, k - 1);
            } else {
                ops.swap(0, k - 1);
            }
            heap(k - 1, ops, out);
        }
    }

    let mut ops = ops.to_vec();
    let mut out = Vec::new();
    let len = ops.len();
    heap(len, &mut ops, &mut out);
    out
}

fn final_state(region: &Region) -> (Option<SlotState>, Option<VersionMarker>) {
    match region.entry(b"k") {
        Some(entry) => (Some(entry.state), entry.version),
        None => (None, None),
    }
}

// =============================================================================
// Delivery Order
// =============================================================================

#[test]
fn test_permutations_cover_all_orders() {
    let ops = vec![
        RemoteOp::Destroy(marker(2, 1)),
        RemoteOp::Destroy(marker(2, 2)),
        RemoteOp::Destroy(marker(2, 3)),
    ];
    assert_eq!(permutations(&ops).len(), 6);
}

#[test]
fn test_every_delivery_order_converges_to_newest_destroy() {
    let ops = vec![
        RemoteOp::Put("a", marker(2, 10)),
        RemoteOp::Destroy(marker(3, 20)),
        RemoteOp::Put("b", marker(2, 15)),
        RemoteOp::Destroy(marker(2, 30)),
    ];

    for order in permutations(&ops) {
        let region = region(1, false);
        for op in &order {
            apply(&region, op);
        }
        assert_eq!(
            final_state(&region),
            (Some(SlotState::Tombstone(marker(2, 30))), Some(marker(2, 30))),
            "order {:?}",
            order
        );
    }
}

#[test]
fn test_every_delivery_order_converges_to_newest_put() {
    let ops = vec![
        RemoteOp::Destroy(marker(3, 5)),
        RemoteOp::Put("old", marker(2, 4)),
        RemoteOp::Put("new", marker(3, 40)),
        RemoteOp::Destroy(marker(2, 25)),
    ];

    for order in permutations(&ops) {
        let region = region(1, true);
        for op in &order {
            apply(&region, op);
        }
        assert_eq!(
            final_state(&region),
            (
                Some(SlotState::Live(Bytes::from_static(b"new"))),
                Some(marker(3, 40))
            ),
            "order {:?}",
            order
        );
    }
}

#[test]
fn test_timestamp_tie_broken_by_member() {
    let ops = vec![
        RemoteOp::Destroy(marker(2, 100)),
        RemoteOp::Put("winner", marker(5, 100)),
    ];

    for order in permutations(&ops) {
        let region = region(1, false);
        for op in &order {
            apply(&region, op);
        }
        assert_eq!(region.get(b"k"), Some(Bytes::from_static(b"winner")));
    }
}

// =============================================================================
// Concurrent Delivery
// =============================================================================

#[test]
fn test_concurrent_remote_destroys_keep_greatest_marker() {
    for _ in 0..20 {
        let region = Arc::new(region(1, true));
        region.put("k", "v");
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let region = Arc::clone(&region);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..10u64 {
                        let ts = u64::MAX / 2 + i * 8 + t;
                        let _ = region.apply_remote_destroy("k", marker(2 + t as u32, ts));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let newest = marker(9, u64::MAX / 2 + 9 * 8 + 7);
        assert_eq!(final_state(&region).0, Some(SlotState::Tombstone(newest)));
        assert_eq!(region.scheduled_tombstone(b"k"), Some(newest));
    }
}

#[test]
fn test_concurrent_remote_puts_and_destroys_converge() {
    let ops: Vec<RemoteOp> = (0..40u64)
        .map(|i| {
            let m = marker(2 + (i % 3) as u32, 1_000 + i);
            if i % 2 == 0 {
                RemoteOp::Put("v", m)
            } else {
                RemoteOp::Destroy(m)
            }
        })
        .collect();
    let ops = Arc::new(ops);

    let region = Arc::new(region(1, true));
    let handles: Vec<_> = (0..4usize)
        .map(|t| {
            let region = Arc::clone(&region);
            let ops = Arc::clone(&ops);
            thread::spawn(move || {
                for op in ops.iter().skip(t).step_by(4) {
                    apply(&region, op);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Op 39 (a destroy) carries the greatest marker
    let newest = marker(2, 1_039);
    assert_eq!(final_state(&region).0, Some(SlotState::Tombstone(newest)));
}

// =============================================================================
// Member Exchange
// =============================================================================

#[derive(Default)]
struct Outbox {
    events: Mutex<Vec<RemovalEvent>>,
}

impl ReplicationSink for Outbox {
    fn distribute(&self, event: &RemovalEvent) {
        self.events.lock().push(event.clone());
    }

    fn notify_timestamp_update(&self, _key: &Key, _marker: &VersionMarker) {}
}

fn member(id: u32) -> (Region, Arc<Outbox>) {
    let outbox = Arc::new(Outbox::default());
    let config = RegionConfig::builder()
        .member_id(MemberId(id))
        .concurrency_checks(true)
        .build();
    let region = Region::open(config, Collaborators::new().with_replication(outbox.clone())).unwrap();
    (region, outbox)
}

#[test]
fn test_two_members_converge_after_exchange() {
    let (a, _) = member(1);
    let (b, b_outbox) = member(2);

    // A creates, B learns of it
    assert_eq!(a.put("k", "v"), PutOutcome::Created);
    let created = a.entry(b"k").unwrap().version.unwrap();
    assert_eq!(b.apply_remote_put("k", "v", created), PutOutcome::Created);

    // B destroys, A learns of it
    assert_eq!(b.remove("k"), Ok(Outcome::Tombstoned));
    let event = b_outbox.events.lock().pop().unwrap();
    let destroyed = event.marker.unwrap();
    assert!(destroyed > created);
    assert_eq!(event.old_value, Some(Bytes::from_static(b"v")));

    assert_eq!(a.apply_remote_destroy("k", destroyed), Ok(Outcome::Tombstoned));

    // Redelivery is a replay on both sides
    assert_eq!(a.apply_remote_destroy("k", destroyed), Ok(Outcome::Replay));
    assert_eq!(b.apply_remote_destroy("k", destroyed), Ok(Outcome::Replay));

    assert_eq!(final_state(&a), final_state(&b));
    assert_eq!(final_state(&a).0, Some(SlotState::Tombstone(destroyed)));
}

#[test]
fn test_concurrent_writes_on_two_members_converge() {
    let (a, _) = member(1);
    let (b, _) = member(2);

    a.put("k", "from-a");
    b.put("k", "from-b");
    let from_a = a.entry(b"k").unwrap().version.unwrap();
    let from_b = b.entry(b"k").unwrap().version.unwrap();

    a.apply_remote_put("k", "from-b", from_b);
    b.apply_remote_put("k", "from-a", from_a);

    assert_eq!(final_state(&a), final_state(&b));
    let winner = if from_a > from_b { "from-a" } else { "from-b" };
    assert_eq!(a.get(b"k"), Some(Bytes::from(winner)));
}
