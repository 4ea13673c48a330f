//! Tests for the last-writer-wins write protocol.

use std::collections::BTreeMap;

use proptest::prelude::*;
use synced_signal::{
    ManualClock, RemoteOutcome, RemoteUpdate, Runtime, SequentialIds, Signal, SignalError, Stamp,
};

fn runtime() -> Runtime {
    Runtime::builder()
        .manual_clock(ManualClock::new())
        .id_source(SequentialIds::new("local-"))
        .build()
        .unwrap()
}

fn register(rt: &Runtime, value: i32, revision: u64, id: &str) -> Signal<i32> {
    rt.signal_builder()
        .value(value)
        .revision(revision)
        .revision_id(id)
        .build()
        .unwrap()
}

// =============================================================================
// Remote Resolution
// =============================================================================

#[test]
fn test_remote_sequence_converges_on_highest_stamp() {
    let rt = runtime();
    let signal = register(&rt, 1, 1, "a");

    assert_eq!(signal.apply_remote(2, "b", 2).unwrap(), RemoteOutcome::Applied);
    assert_eq!(signal.get(), Some(2));
    assert_eq!(signal.revision(), 2);
    assert_eq!(signal.revision_id(), "b");

    assert_eq!(signal.apply_remote(2, "c", 3).unwrap(), RemoteOutcome::Applied);
    assert_eq!(signal.get(), Some(3));

    assert_eq!(signal.apply_remote(2, "b", 2).unwrap(), RemoteOutcome::Stale);
    assert_eq!(signal.get(), Some(3));
    assert_eq!(signal.stamp(), Stamp::new(2, "c").unwrap());
}

#[test]
fn test_lower_revision_is_stale_whatever_the_id() {
    let rt = runtime();
    let signal = register(&rt, 1, 5, "m");
    assert_eq!(signal.apply_remote(4, "zzzz", 9).unwrap(), RemoteOutcome::Stale);
    assert_eq!(signal.get(), Some(1));
    assert_eq!(signal.apply_remote(5, "a", 9).unwrap(), RemoteOutcome::Stale);
    assert_eq!(signal.apply_remote(5, "m", 1).unwrap(), RemoteOutcome::Duplicate);
    assert_eq!(rt.pending_timers(), 0);
}

#[test]
fn test_equal_value_adopts_stamp_without_notifying() {
    let rt = runtime();
    let signal = register(&rt, 7, 1, "a");
    assert_eq!(signal.apply_remote(3, "peer", 7).unwrap(), RemoteOutcome::Adopted);
    assert_eq!(signal.revision(), 3);
    assert_eq!(signal.revision_id(), "peer");
    assert_eq!(rt.pending_timers(), 0);
}

#[test]
fn test_local_write_after_remote_continues_from_remote_revision() {
    let rt = runtime();
    let signal = register(&rt, 1, 1, "a");
    signal.apply_remote(10, "peer", 2).unwrap();
    signal.set(3).unwrap();
    assert_eq!(signal.revision(), 11);
    assert_eq!(signal.revision_id(), "local-00000000000000000001");
}

#[test]
fn test_local_write_at_max_revision_fails_without_diverging() {
    let rt = runtime();
    let local = rt
        .signal_builder()
        .value(1)
        .revision(u64::MAX)
        .revision_id("zzz")
        .build()
        .unwrap();
    let peer = rt
        .signal_builder()
        .value(1)
        .revision(u64::MAX)
        .revision_id("zzz")
        .build()
        .unwrap();

    assert!(matches!(
        local.set(2),
        Err(SignalError::RevisionExhausted { revision: u64::MAX })
    ));
    assert!(matches!(
        local.update(|v| v.copied().unwrap_or(0) + 1),
        Err(SignalError::RevisionExhausted { .. })
    ));
    assert_eq!(local.get(), Some(1));
    assert_eq!(local.stamp(), Stamp::new(u64::MAX, "zzz").unwrap());
    assert_eq!(rt.pending_timers(), 0);

    let frame = local.snapshot().unwrap();
    assert_eq!(
        peer.apply_remote_update(frame).unwrap(),
        RemoteOutcome::Duplicate
    );
    assert_eq!(peer.get(), local.get());

    // An equal value is still a no-op rather than an error.
    assert!(!local.set(1).unwrap());
}

#[test]
fn test_equal_local_write_is_a_no_op() {
    let rt = runtime();
    let signal = rt.signal(vec!["a".to_string()]).unwrap();
    let before = signal.stamp();
    assert!(!signal.set(vec!["a".to_string()]).unwrap());
    assert_eq!(signal.stamp(), before);
    assert_eq!(rt.pending_timers(), 0);
}

#[test]
fn test_map_key_order_does_not_matter() {
    let rt = runtime();
    let mut first = BTreeMap::new();
    first.insert("x".to_string(), 1);
    first.insert("y".to_string(), 2);
    let signal = rt.signal(serde_json::json!({ "y": 2, "x": 1 })).unwrap();
    assert!(!signal
        .set(serde_json::to_value(&first).unwrap())
        .unwrap());
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_remote_validation_errors() {
    let rt = runtime();
    let signal = register(&rt, 1, 1, "a");
    assert!(matches!(
        signal.apply_remote(0, "b", 2),
        Err(SignalError::InvalidRevision { revision: 0 })
    ));
    assert!(matches!(
        signal.apply_remote(2, "", 2),
        Err(SignalError::InvalidId)
    ));
    assert_eq!(signal.get(), Some(1));
    assert_eq!(signal.revision(), 1);
}

#[test]
fn test_unencodable_value_is_rejected() {
    let rt = runtime();
    let signal = rt.signal(BTreeMap::<(u8, u8), u8>::new()).unwrap();
    let mut bad = BTreeMap::new();
    bad.insert((1, 2), 3);
    assert!(matches!(
        signal.set(bad.clone()),
        Err(SignalError::Serialization(_))
    ));
    assert!(matches!(
        signal.apply_remote(9, "z", bad),
        Err(SignalError::Serialization(_))
    ));
    assert_eq!(signal.revision(), 1);
    assert!(matches!(
        rt.signal({
            let mut m = BTreeMap::new();
            m.insert((0u8, 0u8), 0u8);
            m
        }),
        Err(SignalError::Serialization(_))
    ));
}

#[test]
fn test_frozen_rejects_every_write_before_other_checks() {
    let rt = runtime();
    let signal = register(&rt, 1, 1, "a");
    signal.freeze();
    signal.freeze();
    assert!(signal.is_frozen());
    assert!(matches!(signal.set(2), Err(SignalError::Frozen)));
    assert!(matches!(signal.apply_remote(0, "", 2), Err(SignalError::Frozen)));
    assert!(matches!(signal.apply_remote(9, "z", 2), Err(SignalError::Frozen)));
    assert_eq!(signal.get(), Some(1));

    signal.dispose();
    assert!(matches!(signal.set(2), Err(SignalError::Frozen)));
}

#[test]
fn test_disposed_rejects_writes_but_keeps_value() {
    let rt = runtime();
    let signal = register(&rt, 1, 1, "a");
    signal.dispose();
    signal.dispose();
    assert!(signal.is_disposed());
    assert!(matches!(signal.set(2), Err(SignalError::Disposed)));
    assert!(matches!(signal.apply_remote(0, "", 2), Err(SignalError::Disposed)));
    assert_eq!(signal.get(), Some(1));
}

// =============================================================================
// Transport Frames
// =============================================================================

#[test]
fn test_snapshot_replicates_between_runtimes() {
    let a = runtime();
    let b = runtime();
    let source = a.signal("draft".to_string()).unwrap();
    let replica = b.signal(String::new()).unwrap();

    source.set("final".to_string()).unwrap();
    let frame = source.snapshot().unwrap();
    assert_eq!(
        replica.apply_remote_update(frame.clone()).unwrap(),
        RemoteOutcome::Applied
    );
    assert_eq!(replica.apply_remote_update(frame).unwrap(), RemoteOutcome::Duplicate);
    assert_eq!(replica.get(), source.get());
    assert_eq!(replica.stamp(), source.stamp());
}

#[test]
fn test_invalid_frame_is_rejected_by_signal() {
    let rt = runtime();
    let signal = rt.signal(1).unwrap();
    let frame: RemoteUpdate<i32> =
        serde_json::from_str(r#"{ "revision": 2, "id": "", "value": 5 }"#).unwrap();
    assert!(matches!(
        signal.apply_remote_update(frame),
        Err(SignalError::InvalidId)
    ));
}

// =============================================================================
// Properties
// =============================================================================

fn updates() -> impl Strategy<Value = (Vec<(u64, String)>, Vec<(u64, String)>)> {
    prop::collection::vec(
        (1u64..6, prop::sample::select(vec!["a", "b", "c", "d", "e"])),
        0..24,
    )
    .prop_map(|raw| {
        let mut seen = Vec::new();
        for (revision, id) in raw {
            let stamp = (revision, id.to_string());
            if !seen.contains(&stamp) {
                seen.push(stamp);
            }
        }
        seen
    })
    .prop_flat_map(|unique| (Just(unique.clone()), Just(unique).prop_shuffle()))
}

fn value_of(revision: u64, id: &str) -> String {
    format!("{revision}/{id}")
}

proptest! {
    #[test]
    fn prop_delivery_order_does_not_matter((ordered, shuffled) in updates()) {
        let rt = runtime();
        let left = rt.signal_builder().value(String::new()).revision_id("0").build().unwrap();
        let right = rt.signal_builder().value(String::new()).revision_id("0").build().unwrap();

        for (revision, id) in &ordered {
            left.apply_remote(*revision, id, value_of(*revision, id)).unwrap();
        }
        for (revision, id) in &shuffled {
            right.apply_remote(*revision, id, value_of(*revision, id)).unwrap();
        }

        prop_assert_eq!(left.stamp(), right.stamp());
        prop_assert_eq!(left.get(), right.get());
        if let Some((revision, id)) = ordered.iter().max() {
            prop_assert_eq!(left.get(), Some(value_of(*revision, id)));
        }
    }

    #[test]
    fn prop_stamp_never_moves_backwards((ordered, _) in updates()) {
        let rt = runtime();
        let signal = rt.signal_builder().value(String::new()).revision_id("0").build().unwrap();
        let mut last = (signal.revision(), signal.revision_id().as_str().to_string());
        for (revision, id) in &ordered {
            signal.apply_remote(*revision, id, value_of(*revision, id)).unwrap();
            let now = (signal.revision(), signal.revision_id().as_str().to_string());
            prop_assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn prop_redelivery_is_idempotent((ordered, _) in updates()) {
        let rt = runtime();
        let signal = rt.signal_builder().value(String::new()).revision_id("0").build().unwrap();
        for (revision, id) in &ordered {
            signal.apply_remote(*revision, id, value_of(*revision, id)).unwrap();
            let stamp = signal.stamp();
            let value = signal.get();
            let again = signal.apply_remote(*revision, id, value_of(*revision, id)).unwrap();
            prop_assert!(matches!(again, RemoteOutcome::Duplicate | RemoteOutcome::Stale));
            prop_assert_eq!(signal.stamp(), stamp);
            prop_assert_eq!(signal.get(), value);
        }
    }
}
