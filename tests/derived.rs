//! Tests for derived signals: map, try_map, merge and disposal.

use std::sync::{Arc, Mutex};

use synced_signal::{ManualClock, NodeKind, Runtime, SequentialIds, Signal, SignalError};

fn runtime() -> Runtime {
    Runtime::builder()
        .manual_clock(ManualClock::new())
        .id_source(SequentialIds::new("d-"))
        .build()
        .unwrap()
}

type ErrorLog<T> = Arc<Mutex<Vec<(String, Option<T>)>>>;

fn capture_errors<T: Clone + Send + Sync + 'static>(signal: &Signal<T>) -> ErrorLog<T> {
    let log: ErrorLog<T> = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    signal.on_error(move |err, value| sink.lock().unwrap().push((err.to_string(), value.cloned())));
    log
}

// =============================================================================
// Map
// =============================================================================

#[test]
fn test_map_follows_parent_and_is_frozen() {
    let rt = runtime();
    let base = rt.signal(10).unwrap();
    let derived = base.map(|x| x + 1).unwrap();
    assert_eq!(derived.get(), Some(11));
    assert!(derived.is_frozen());
    assert_eq!(derived.kind(), NodeKind::Map);

    base.set(20).unwrap();
    rt.run_until_idle();
    assert_eq!(derived.get(), Some(21));

    assert!(matches!(derived.set(0), Err(SignalError::Frozen)));
    assert!(matches!(
        derived.apply_remote(99, "z", 0),
        Err(SignalError::Frozen)
    ));
    assert_eq!(derived.get(), Some(21));
}

#[test]
fn test_map_of_empty_parent_is_empty_until_first_value() {
    let rt = runtime();
    let base = rt.empty_signal::<String>().unwrap();
    let len = base.map(|s| s.len()).unwrap();
    assert_eq!(len.get(), None);

    base.set("four".to_string()).unwrap();
    rt.run_until_idle();
    assert_eq!(len.get(), Some(4));
}

#[test]
fn test_map_chain_propagates_through_levels() {
    let rt = runtime();
    let a = rt.signal(1).unwrap();
    let b = a.map(|x| x * 10).unwrap();
    let c = b.map(|x| format!("#{x}")).unwrap();
    assert_eq!(c.get().as_deref(), Some("#10"));

    a.set(2).unwrap();
    rt.run_until_idle();
    assert_eq!(b.get(), Some(20));
    assert_eq!(c.get().as_deref(), Some("#20"));
}

#[test]
fn test_equal_derivation_does_not_bump_revision() {
    let rt = runtime();
    let a = rt.signal(3).unwrap();
    let parity = a.map(|x| x % 2).unwrap();
    a.set(5).unwrap();
    rt.run_until_idle();
    assert_eq!(parity.get(), Some(1));
    assert_eq!(parity.revision(), 1);
}

#[test]
fn test_initial_derivation_failure_fails_map() {
    let rt = runtime();
    let input = rt.signal("x".to_string()).unwrap();
    let result = input.try_map(|s| s.parse::<i32>());
    assert!(matches!(result, Err(SignalError::Derivation(_))));

    let panicking = input.map(|_| -> i32 { panic!("no") });
    assert!(matches!(panicking, Err(SignalError::Derivation(_))));
    assert!(input.children().is_empty());
}

#[test]
fn test_derivation_failure_is_isolated() {
    let rt = runtime();
    let input = rt.signal("1".to_string()).unwrap();
    let parsed = input.try_map(|s| s.parse::<i32>()).unwrap();
    let parsed_errors = capture_errors(&parsed);
    let input_errors = capture_errors(&input);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    input
        .subscribe(move |value: &String, _, _, _| log.lock().unwrap().push(value.clone()))
        .unwrap();

    input.set("nope".to_string()).unwrap();
    rt.run_until_idle();

    assert_eq!(parsed.get(), Some(1));
    assert_eq!(*seen.lock().unwrap(), vec!["1".to_string(), "nope".to_string()]);
    assert!(input_errors.lock().unwrap().is_empty());
    let errors = parsed_errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0.starts_with("derivation failed"));
    assert_eq!(errors[0].1, Some(1));
}

#[test]
fn test_panicking_derivation_is_contained() {
    let rt = runtime();
    let input = rt.signal(1).unwrap();
    let guarded = input
        .map(|x| {
            if *x > 1 {
                panic!("too big");
            }
            *x
        })
        .unwrap();
    let errors = capture_errors(&guarded);

    input.set(2).unwrap();
    rt.run_until_idle();
    assert_eq!(guarded.get(), Some(1));
    assert_eq!(errors.lock().unwrap()[0].0, "derivation failed: panicked: too big");

    input.set(0).unwrap();
    rt.run_until_idle();
    assert_eq!(guarded.get(), Some(0));
}

#[test]
fn test_map_derives_from_parent_value_after_reentrant_write() {
    let rt = runtime();
    let parent = rt.signal(1).unwrap();
    parent
        .set_debounce(std::time::Duration::from_millis(10))
        .unwrap();

    let writer = parent.clone();
    parent
        .subscribe(move |value: &i32, _, _, _| {
            if *value == 2 {
                writer.set(3).unwrap();
            }
        })
        .unwrap();

    let derived = parent.map(|x| x * 100).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let observed = parent.clone();
    derived
        .subscribe(move |value: &i32, _, _, _| {
            log.lock().unwrap().push((*value, observed.get()));
        })
        .unwrap();

    parent.set(2).unwrap();
    rt.run_until_idle();

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![(100, Some(1)), (300, Some(3))]);
    for (derived_value, parent_value) in seen.iter() {
        assert_eq!(Some(*derived_value), parent_value.map(|p| p * 100));
    }
    assert_eq!(derived.get(), Some(300));
}

#[test]
fn test_derived_survives_dropped_handle_chain() {
    let rt = runtime();
    let a = rt.signal(1).unwrap();
    let last = a.map(|x| x + 1).unwrap().map(|x| x * 100).unwrap();
    a.set(2).unwrap();
    rt.run_until_idle();
    assert_eq!(last.get(), Some(300));
}

// =============================================================================
// Merge
// =============================================================================

#[test]
fn test_merge_delivers_positional_values() {
    let rt = runtime();
    let x = rt.signal("x".to_string()).unwrap();
    let y = rt.signal("y".to_string()).unwrap();
    let g = x.merge([&y]).unwrap();
    assert_eq!(g.get(), Some(vec!["x".to_string(), "y".to_string()]));
    assert!(g.is_frozen());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    g.subscribe(move |values: &[String]| log.lock().unwrap().push(values.to_vec()))
        .unwrap();

    x.set("X".to_string()).unwrap();
    rt.run_until_idle();
    assert_eq!(
        seen.lock().unwrap().last().cloned(),
        Some(vec!["X".to_string(), "y".to_string()])
    );
}

#[test]
fn test_merge_notifies_once_per_window() {
    let rt = Runtime::builder()
        .manual_clock(ManualClock::new())
        .default_debounce(std::time::Duration::from_millis(10))
        .build()
        .unwrap();
    let a = rt.signal(1).unwrap();
    let b = rt.signal(2).unwrap();
    let c = rt.signal(3).unwrap();
    let merged = a.merge([&b, &c]).unwrap();

    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let log = deliveries.clone();
    merged
        .subscribe(move |values: &[i32]| log.lock().unwrap().push(values.to_vec()))
        .unwrap();

    a.set(10).unwrap();
    b.set(20).unwrap();
    c.set(30).unwrap();
    rt.run_until_idle();

    assert_eq!(
        *deliveries.lock().unwrap(),
        vec![vec![1, 2, 3], vec![10, 20, 30]]
    );
}

#[test]
fn test_merge_errors() {
    let rt = runtime();
    let other = runtime();
    let x = rt.signal(1).unwrap();
    let foreign = other.signal(2).unwrap();
    let gone = rt.signal(3).unwrap();
    gone.dispose();

    assert!(matches!(
        x.merge(Vec::<&Signal<i32>>::new()),
        Err(SignalError::EmptyMerge)
    ));
    assert!(matches!(
        x.merge([&foreign]),
        Err(SignalError::NotASignal { id }) if id == foreign.id()
    ));
    assert!(matches!(
        x.merge([&gone]),
        Err(SignalError::NotASignal { id }) if id == gone.id()
    ));
    assert!(x.children().is_empty());
}

#[test]
fn test_merge_of_disposed_caller_fails() {
    let rt = runtime();
    let x = rt.signal(1).unwrap();
    let y = rt.signal(2).unwrap();
    x.dispose();
    assert!(matches!(x.merge([&y]), Err(SignalError::Disposed)));
    assert!(matches!(x.map(|v| v + 1), Err(SignalError::Disposed)));
}

// =============================================================================
// Graph and Disposal
// =============================================================================

#[test]
fn test_graph_introspection() {
    let rt = runtime();
    let a = rt.signal(1).unwrap();
    let b = rt.signal(2).unwrap();
    let doubled = a.map(|x| x * 2).unwrap();
    let merged = a.merge([&b]).unwrap();

    assert_eq!(a.children().to_vec(), vec![doubled.id(), merged.id()]);
    assert_eq!(merged.parents().to_vec(), vec![a.id(), b.id()]);
    assert_eq!(rt.node_kind(merged.id()), Some(NodeKind::Merge));
    assert_eq!(rt.node_count(), 4);
    assert_eq!(a.listener_count(), 0);
}

#[test]
fn test_dispose_cascades_to_descendants() {
    let rt = runtime();
    let a = rt.signal(1).unwrap();
    let b = a.map(|x| x + 1).unwrap();
    let c = b.map(|x| x + 1).unwrap();
    let other = rt.signal(5).unwrap();
    let merged = other.merge([&c]).unwrap();

    a.dispose();
    assert!(b.is_disposed());
    assert!(c.is_disposed());
    assert!(merged.is_disposed());
    assert!(!other.is_disposed());
    assert!(other.children().is_empty());
    assert_eq!(rt.node_count(), 1);

    assert_eq!(b.get(), Some(2));
    assert!(matches!(
        c.subscribe(|_, _, _, _| {}),
        Err(SignalError::Disposed)
    ));

    other.set(6).unwrap();
    rt.run_until_idle();
    assert_eq!(merged.get(), Some(vec![5, 3]));
}

#[test]
fn test_disposing_derived_detaches_from_parent() {
    let rt = runtime();
    let a = rt.signal(1).unwrap();
    let b = a.map(|x| x + 1).unwrap();
    b.dispose();
    assert!(a.children().is_empty());
    assert!(!a.is_disposed());

    a.set(9).unwrap();
    rt.run_until_idle();
    assert_eq!(b.get(), Some(2));
}

#[test]
fn test_dispose_cancels_pending_notification() {
    let rt = runtime();
    let a = rt.signal(1).unwrap();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    a.subscribe(move |_, _, _, _| *counter.lock().unwrap() += 1)
        .unwrap();
    a.set(2).unwrap();
    assert_eq!(rt.pending_timers(), 1);
    a.dispose();
    assert_eq!(rt.pending_timers(), 0);
    rt.run_until_idle();
    assert_eq!(*calls.lock().unwrap(), 1);
}
