//! Integration Tests for the Atom Store
//!
//! These tests drive the public API only: atoms are defined, read and
//! written through a `Store`, and observed through subscriptions.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use quanta_core::{Atom, AtomKind, GcPolicy, Store, StoreConfig, StoreError, Unreadable};

/// Record every value a listener receives.
fn recorder<V: Clone + 'static>() -> (Rc<RefCell<Vec<V>>>, impl Fn(&V) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |value: &V| sink.borrow_mut().push(value.clone()))
}

/// Test that a primitive reads its initial value and then the last value set.
#[test]
fn primitive_identity() {
    let store = Store::new();
    let text = Atom::new("hello".to_string()).with_label("text");

    assert_eq!(text.kind(), AtomKind::Primitive);
    assert_eq!(store.get(&text).unwrap(), "hello");

    store.set(&text, "world".to_string()).unwrap();
    assert_eq!(store.get(&text).unwrap(), "world");
}

/// Test that a derived atom always agrees with its inputs.
#[test]
fn derived_atom_stays_consistent() {
    let store = Store::new();
    let first = Atom::new(1);
    let second = Atom::new(10);
    let total = Atom::derived({
        let (first, second) = (first.clone(), second.clone());
        move |get| Ok(get.get(&first)? + get.get(&second)?)
    });

    for (a, b) in [(2, 20), (5, -5), (0, 0)] {
        store.set(&first, a).unwrap();
        store.set(&second, b).unwrap();
        assert_eq!(store.get(&total).unwrap(), a + b);
    }
}

/// Test the end-to-end flow: subscribe to a derived atom, write its input,
/// and see the listener called once with the new value.
#[test]
fn listener_sees_derived_update() {
    let store = Store::new();
    let a = Atom::new(0);
    let b = Atom::derived({
        let a = a.clone();
        move |get| Ok(get.get(&a)? * 2)
    });

    let (seen, listener) = recorder::<i32>();
    let _subscription = store.subscribe(&b, listener).unwrap();

    store.set(&a, 5).unwrap();
    assert_eq!(store.get(&b).unwrap(), 10);
    assert_eq!(*seen.borrow(), vec![10]);
}

/// Test that a diamond is notified once per write, never with a mixed
/// (glitched) value.
///
/// `sum` reads `count` directly and through `doubled`; one write to `count`
/// changes both of its inputs.
#[test]
fn diamond_notifies_once_per_write() {
    let store = Store::new();
    let count = Atom::new(1);
    let doubled = Atom::derived({
        let count = count.clone();
        move |get| Ok(get.get(&count)? * 2)
    });
    let sum = Atom::derived({
        let (count, doubled) = (count.clone(), doubled.clone());
        move |get| Ok(get.get(&count)? + get.get(&doubled)?)
    });

    let (seen, listener) = recorder::<i32>();
    let _subscription = store.subscribe(&sum, listener).unwrap();
    assert_eq!(store.get(&sum).unwrap(), 3);

    store.set(&count, 2).unwrap();
    assert_eq!(*seen.borrow(), vec![6]);
}

/// Test that several writes inside one write function produce one
/// notification.
#[test]
fn compound_write_is_batched() {
    let store = Store::new();
    let x = Atom::new(0);
    let y = Atom::new(0);
    let sum = Atom::derived({
        let (x, y) = (x.clone(), y.clone());
        move |get| Ok(get.get(&x)? + get.get(&y)?)
    });
    let set_both = Atom::write_only({
        let (x, y) = (x.clone(), y.clone());
        move |_, set, value: i32| {
            set.set(&x, value)?;
            set.set(&y, value)
        }
    });

    let (seen, listener) = recorder::<i32>();
    let _subscription = store.subscribe(&sum, listener).unwrap();

    store.set(&set_both, 4).unwrap();
    assert_eq!(*seen.borrow(), vec![8]);
}

/// Test that writing an equal value notifies nobody, and that a derived
/// atom recomputing to an equal value does not notify either.
#[test]
fn no_notification_without_change() {
    let store = Store::new();
    let count = Atom::new(2);
    let is_even = Atom::derived({
        let count = count.clone();
        move |get| Ok(get.get(&count)? % 2 == 0)
    });

    let (count_seen, count_listener) = recorder::<i32>();
    let (even_seen, even_listener) = recorder::<bool>();
    let _count_sub = store.subscribe(&count, count_listener).unwrap();
    let _even_sub = store.subscribe(&is_even, even_listener).unwrap();

    store.set(&count, 2).unwrap();
    assert!(count_seen.borrow().is_empty());

    store.set(&count, 4).unwrap();
    assert_eq!(*count_seen.borrow(), vec![4]);
    assert!(even_seen.borrow().is_empty());

    store.set(&count, 5).unwrap();
    assert_eq!(*even_seen.borrow(), vec![false]);
}

/// Test that an unsubscribed listener is never invoked again.
#[test]
fn unsubscribe_stops_notifications() {
    let store = Store::new();
    let count = Atom::new(0);
    let calls = Rc::new(Cell::new(0));

    let subscription = store
        .subscribe(&count, {
            let calls = calls.clone();
            move |_| calls.set(calls.get() + 1)
        })
        .unwrap();

    store.set(&count, 1).unwrap();
    subscription.unsubscribe();
    store.set(&count, 2).unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(store.listener_count(&count), 0);
}

/// Test a write-only action atom: it updates state and cannot be read.
#[test]
fn write_only_decrement() {
    let store = Store::new();
    let count = Atom::new(10);
    let decrement: Atom<Unreadable, i32> = Atom::write_only({
        let count = count.clone();
        move |get, set, by: i32| {
            let current = get.get(&count)?;
            set.set(&count, current - by)
        }
    });

    store.set(&decrement, 3).unwrap();
    assert_eq!(store.get(&count).unwrap(), 7);

    assert!(!decrement.is_readable());
    assert!(matches!(
        store.get(&decrement),
        Err(StoreError::Unreadable(label)) if label.id == decrement.id()
    ));
}

/// Test the updater form of a write: the new value is computed from the
/// current one.
#[test]
fn updater_increments_counter() {
    let store = Store::new();
    let count = Atom::new(0);

    store.update(&count, |c| c + 1).unwrap();
    store.update(&count, |c| c + 1).unwrap();
    assert_eq!(store.get(&count).unwrap(), 2);
}

/// Test a read-write atom that exposes a scaled view of a primitive and
/// writes through to it.
#[test]
fn read_write_atom_writes_through() {
    let store = Store::new();
    let count = Atom::new(1);
    let doubled = Atom::read_write(
        {
            let count = count.clone();
            move |get| Ok(get.get(&count)? * 2)
        },
        {
            let count = count.clone();
            move |get, set, by: i32| {
                let current = get.get(&count)?;
                set.set(&count, current + by)
            }
        },
    );

    assert_eq!(doubled.kind(), AtomKind::ReadWrite);
    assert_eq!(store.get(&doubled).unwrap(), 2);

    store.set(&doubled, 2).unwrap();
    assert_eq!(store.get(&count).unwrap(), 3);
    assert_eq!(store.get(&doubled).unwrap(), 6);
}

/// Test that a read-only atom rejects writes without touching any state.
#[test]
fn read_only_atom_rejects_writes() {
    let store = Store::new();
    let count = Atom::new(1);
    let plus_one = Atom::derived({
        let count = count.clone();
        move |get| Ok(get.get(&count)? + 1)
    })
    .with_label("plusOne");

    let err = store.set(&plus_one, 100).unwrap_err();
    assert_eq!(err.to_string(), format!("atom plusOne#{} is not writable", plus_one.id()));
    assert_eq!(store.get(&plus_one).unwrap(), 2);
}

/// Test that dependencies are re-recorded on every evaluation, so a branch
/// that is no longer taken stops triggering recomputation.
#[test]
fn conditional_dependency_is_dropped() {
    let store = Store::new();
    let use_left = Atom::new(true);
    let left = Atom::new(1);
    let right = Atom::new(100);
    let evaluations = Rc::new(Cell::new(0));
    let chosen = Atom::derived({
        let (use_left, left, right) = (use_left.clone(), left.clone(), right.clone());
        let evaluations = evaluations.clone();
        move |get| {
            evaluations.set(evaluations.get() + 1);
            if get.get(&use_left)? {
                get.get(&left)
            } else {
                get.get(&right)
            }
        }
    });

    let (seen, listener) = recorder::<i32>();
    let _subscription = store.subscribe(&chosen, listener).unwrap();
    assert_eq!(store.dependent_count(&right), 0);

    store.set(&use_left, false).unwrap();
    assert_eq!(*seen.borrow(), vec![100]);
    assert_eq!(store.dependent_count(&left), 0);
    assert_eq!(store.dependent_count(&right), 1);

    let before = evaluations.get();
    store.set(&left, 2).unwrap();
    assert_eq!(evaluations.get(), before);
    assert_eq!(*seen.borrow(), vec![100]);
}

/// Test that a failing read reports its error and leaves the last good value
/// in place for when the input recovers.
#[test]
fn failed_read_keeps_previous_value() {
    let store = Store::new();
    let divisor = Atom::new(2);
    let quotient = Atom::derived({
        let divisor = divisor.clone();
        move |get| match get.get(&divisor)? {
            0 => Err(StoreError::evaluation("division by zero")),
            d => Ok(100 / d),
        }
    });

    let (seen, listener) = recorder::<i32>();
    let _subscription = store.subscribe(&quotient, listener).unwrap();

    store.set(&divisor, 0).unwrap();
    assert!(matches!(store.get(&quotient), Err(StoreError::Evaluation(_))));
    assert!(seen.borrow().is_empty());

    store.set(&divisor, 4).unwrap();
    assert_eq!(store.get(&quotient).unwrap(), 25);
    assert_eq!(*seen.borrow(), vec![25]);
}

/// Test that a panicking listener does not keep others from running, and
/// that the failure is reported to the writer.
#[test]
fn listener_panic_is_isolated() {
    let store = Store::new();
    let count = Atom::new(0);

    let _bad = store.subscribe(&count, |_| panic!("boom")).unwrap();
    let (seen, listener) = recorder::<i32>();
    let _good = store.subscribe(&count, listener).unwrap();

    let err = store.set(&count, 1).unwrap_err();
    assert!(matches!(err, StoreError::Listeners(ref failures) if failures.len() == 1));
    assert_eq!(*seen.borrow(), vec![1]);
    assert_eq!(store.get(&count).unwrap(), 1);
}

/// Test that two stores never share state for the same atom.
#[test]
fn stores_are_isolated() {
    let first = Store::new();
    let second = Store::new();
    let count = Atom::new(0);
    let doubled = Atom::derived({
        let count = count.clone();
        move |get| Ok(get.get(&count)? * 2)
    });

    let (seen, listener) = recorder::<i32>();
    let _subscription = second.subscribe(&doubled, listener).unwrap();

    first.set(&count, 21).unwrap();
    assert_eq!(first.get(&doubled).unwrap(), 42);
    assert_eq!(second.get(&doubled).unwrap(), 0);
    assert!(seen.borrow().is_empty());
}

/// Test that a listener may write back into the store; its write runs as a
/// pass of its own.
#[test]
fn listener_can_write_back() {
    let store = Store::new();
    let source = Atom::new(0);
    let mirror = Atom::new(0);

    let _subscription = store
        .subscribe(&source, {
            let (store, mirror) = (store.clone(), mirror.clone());
            move |value| {
                store.set(&mirror, *value).unwrap();
            }
        })
        .unwrap();

    store.set(&source, 9).unwrap();
    assert_eq!(store.get(&mirror).unwrap(), 9);
}

/// Test that a re-entrant listener's write is the last value other
/// listeners see.
///
/// One write sets `x` and `y`; `x`'s listener then sets `y` again. The pass
/// started by that listener delivers the newer value of `y`, and the outer
/// pass must not follow it with the older one.
#[test]
fn reentrant_write_wins_over_outer_pass() {
    let store = Store::new();
    let x = Atom::new(0);
    let y = Atom::new(0);

    let _x_sub = store
        .subscribe(&x, {
            let (store, y) = (store.clone(), y.clone());
            move |_| {
                store.set(&y, 100).unwrap();
            }
        })
        .unwrap();
    let (seen, listener) = recorder::<i32>();
    let _y_sub = store.subscribe(&y, listener).unwrap();

    let set_both = Atom::write_only({
        let (x, y) = (x.clone(), y.clone());
        move |_, set, value: i32| {
            set.set(&x, value)?;
            set.set(&y, value)
        }
    });

    store.set(&set_both, 1).unwrap();
    assert_eq!(store.get(&y).unwrap(), 100);
    assert_eq!(seen.borrow().last(), Some(&100));
    assert_eq!(*seen.borrow(), vec![100]);
}

/// Test that a write function may read a derived atom it just invalidated
/// without swallowing that atom's notification.
#[test]
fn write_that_reads_derived_still_notifies() {
    let store = Store::new();
    let a = Atom::new(0);
    let doubled = Atom::derived({
        let a = a.clone();
        move |get| Ok(get.get(&a)? * 2)
    });

    let (seen, listener) = recorder::<i32>();
    let _subscription = store.subscribe(&doubled, listener).unwrap();

    let set_and_read = Atom::write_only({
        let (a, doubled) = (a.clone(), doubled.clone());
        move |get, set, value: i32| {
            set.set(&a, value)?;
            get.get(&doubled)
        }
    });

    assert_eq!(store.set(&set_and_read, 5).unwrap(), 10);
    assert_eq!(store.get(&doubled).unwrap(), 10);
    assert_eq!(*seen.borrow(), vec![10]);
}

/// Test that a read which handles its dependency's error still depends on
/// it, so recovery upstream reaches it (lazily and through a listener).
#[test]
fn handled_dependency_error_still_tracks_dependency() {
    let store = Store::new();
    let a = Atom::new(0);
    let checked = Atom::derived({
        let a = a.clone();
        move |get| {
            let value = get.get(&a)?;
            if value < 0 {
                return Err(StoreError::evaluation("negative"));
            }
            Ok(value * 10)
        }
    });
    let fallback = Atom::derived({
        let checked = checked.clone();
        move |get| Ok(get.get(&checked).unwrap_or(-1))
    });

    let (seen, listener) = recorder::<i32>();
    let _subscription = store.subscribe(&fallback, listener).unwrap();

    store.set(&a, -1).unwrap();
    assert_eq!(store.get(&fallback).unwrap(), -1);

    store.set(&a, 5).unwrap();
    assert_eq!(store.get(&fallback).unwrap(), 50);
    assert_eq!(*seen.borrow(), vec![-1, 50]);
}

/// Test that a long chain built one level at a time reports the depth
/// limit instead of overflowing the stack when it is revalidated.
#[test]
fn long_chain_revalidation_hits_depth_limit() {
    let store = Store::with_config(StoreConfig::default().with_max_evaluation_depth(64));
    let base = Atom::new(0);
    let mut tail = base.clone();
    for _ in 0..2_000 {
        let previous = tail.clone();
        tail = Atom::derived(move |get| Ok(get.get(&previous)? + 1));
        store.get(&tail).unwrap();
    }

    store.set(&base, 1).unwrap();
    assert!(matches!(
        store.get(&tail),
        Err(StoreError::DepthExceeded { limit: 64, .. })
    ));
}

/// Test that state for dropped atoms is reclaimed, eagerly or on demand.
#[test]
fn dropped_atoms_are_collected() {
    let base = Atom::new(1);

    let eager = Store::new();
    let manual = Store::with_config(StoreConfig::default().with_gc(GcPolicy::Manual));
    for store in [&eager, &manual] {
        let temp = Atom::derived({
            let base = base.clone();
            move |get| Ok(get.get(&base)? + 1)
        });
        assert_eq!(store.get(&temp).unwrap(), 2);
    }

    eager.set(&base, 2).unwrap();
    manual.set(&base, 2).unwrap();
    assert_eq!(eager.atom_count(), 1);
    assert_eq!(manual.atom_count(), 2);

    assert_eq!(manual.collect_garbage(), 1);
    assert_eq!(manual.atom_count(), 1);
}

/// Test that configuration loads from JSON.
#[test]
fn config_from_json() {
    let config = StoreConfig::from_json(r#"{ "max_evaluation_depth": 8, "gc": "manual" }"#).unwrap();
    assert_eq!(config.max_evaluation_depth, 8);
    assert_eq!(config.gc, GcPolicy::Manual);

    let store = Store::with_config(config);
    assert_eq!(store.config().max_evaluation_depth, 8);
}
