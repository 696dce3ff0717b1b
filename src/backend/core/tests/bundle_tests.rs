//! Tests for status bundles and their versions.
//!
//! Tests cover:
//! - Version ordering across incarnations
//! - Generation counting under concurrent mutation
//! - Snapshot consistency under concurrent mutation
//! - Change notification

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use hubsync_core::bundle::{
    BundleCategory, BundleSnapshot, BundleVersion, ObjectKey, StatusBundle, StatusObject,
};
use serde_json::json;
use tokio_test::{assert_pending, assert_ready};

fn cluster(name: &str, revision: u64) -> StatusObject {
    StatusObject::from_payload(
        BundleCategory::ManagedClusters,
        json!({"metadata": {"name": name}, "status": {"revision": revision}}),
    )
    .unwrap()
}

// ============================================================================
// Version Ordering
// ============================================================================

#[test]
fn test_new_incarnation_beats_any_generation() {
    assert!(BundleVersion::new(6, 0) > BundleVersion::new(5, 999_999));
    assert!(BundleVersion::new(6, 0).newer_than(&BundleVersion::new(5, u64::MAX)));
}

#[test]
fn test_version_order_is_total() {
    let versions = [
        BundleVersion::new(2, 0),
        BundleVersion::new(1, 7),
        BundleVersion::new(1, 0),
        BundleVersion::new(2, 3),
        BundleVersion::new(1, 7),
    ];

    for a in &versions {
        for b in &versions {
            let relations = [a < b, a == b, a > b].iter().filter(|r| **r).count();
            assert_eq!(relations, 1, "{} vs {}", a, b);
        }
    }

    let sorted: Vec<_> = versions.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    assert_eq!(
        sorted,
        vec![
            BundleVersion::new(1, 0),
            BundleVersion::new(1, 7),
            BundleVersion::new(2, 0),
            BundleVersion::new(2, 3),
        ]
    );
}

// ============================================================================
// Concurrent Mutation
// ============================================================================

#[test]
fn test_concurrent_mutations_count_exactly() {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 250;

    let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::ManagedClusters, 3));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let bundle = Arc::clone(&bundle);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let name = format!("cluster-{}", i % 16);
                    if (t + i) % 3 == 0 {
                        bundle.delete_object(&ObjectKey::new(name));
                    } else {
                        bundle.update_object(cluster(&name, i));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(bundle.version(), BundleVersion::new(3, THREADS * PER_THREAD));
}

#[test]
fn test_control_info_deletes_do_not_count() {
    let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::ControlInfo, 1));
    let heartbeat = StatusObject::from_payload(BundleCategory::ControlInfo, json!({})).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bundle = Arc::clone(&bundle);
            let heartbeat = heartbeat.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    bundle.update_object(heartbeat.clone());
                    bundle.delete_object(&heartbeat.key);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(bundle.version(), BundleVersion::new(1, 400));
    assert!(bundle.snapshot().objects.is_empty());
}

#[test]
fn test_snapshots_match_their_version() {
    // each update inserts a distinct object, so content size equals generation
    let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::ManagedClusters, 1));
    let writers: Vec<_> = (0..4)
        .map(|t| {
            let bundle = Arc::clone(&bundle);
            thread::spawn(move || {
                for i in 0..500 {
                    bundle.update_object(cluster(&format!("c-{}-{}", t, i), i));
                }
            })
        })
        .collect();

    let reader = {
        let bundle = Arc::clone(&bundle);
        thread::spawn(move || {
            let mut previous = BundleVersion::new(1, 0);
            for _ in 0..2_000 {
                let snapshot = bundle.snapshot();
                assert!(snapshot.version >= previous);
                assert_eq!(snapshot.objects.len() as u64, snapshot.version.generation);
                previous = snapshot.version;
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();
    assert_eq!(bundle.version(), BundleVersion::new(1, 2_000));
    assert_eq!(bundle.len(), 2_000);
}

// ============================================================================
// Snapshots and Notification
// ============================================================================

#[test]
fn test_snapshot_decodes_to_same_bundle() {
    let bundle = StatusBundle::new("hub1", BundleCategory::Policies, 2);
    bundle.update_object(
        StatusObject::from_payload(
            BundleCategory::Policies,
            json!({"metadata": {"name": "p1", "namespace": "default"}, "compliant": true}),
        )
        .unwrap(),
    );

    let snapshot = bundle.snapshot();
    let decoded = BundleSnapshot::decode(&snapshot.encode().unwrap()).unwrap();
    assert_eq!(decoded, snapshot);
    assert_eq!(decoded.objects[0].key.as_str(), "default/p1");
}

#[test]
fn test_changed_wakes_after_mutation() {
    let bundle = StatusBundle::new("hub1", BundleCategory::ManagedClusters, 1);
    let mut changed = tokio_test::task::spawn(bundle.changed());

    assert_pending!(changed.poll());
    bundle.update_object(cluster("a", 1));
    assert!(changed.is_woken());
    assert_ready!(changed.poll());
}
