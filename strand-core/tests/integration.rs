//! Integration Tests for the Reactive Store
//!
//! These tests verify that atoms, selects, derived values and path accessors
//! work together through a store defined with the builder.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::{json, Value};

use strand_core::config::{PathOptions, StoreConfig};
use strand_core::error::Error;
use strand_core::reactive::{
    atom, derived, select, select_with, Atom, LocalTaskFlush, PathAccessor, QueuedFlush, Select,
    SelectOptions, Store,
};

fn counter() -> (Rc<Cell<usize>>, impl Fn() + 'static) {
    let count = Rc::new(Cell::new(0));
    let count_clone = count.clone();
    (count, move || count_clone.set(count_clone.get() + 1))
}

fn int(value: Value) -> i64 {
    value.as_i64().unwrap_or(0)
}

/// A select over `source` that doubles its value.
fn doubled(source: &Atom) -> Select<()> {
    let source = source.clone();
    select(move |_: &()| Ok(json!(int(source.get()?) * 2)))
}

// ----------------------------------------------------------------------------
// Batching
// ----------------------------------------------------------------------------

/// Several writes in one batch notify a listener once.
#[test]
fn batched_writes_notify_once() {
    let a = atom(0);
    let b = atom(0);
    let store = Store::builder().atom("a", &a).atom("b", &b).build().unwrap();

    let (calls, listener) = counter();
    store.sub_keys(&["a", "b"], listener);

    a.set(1).unwrap();
    a.set(2).unwrap();
    b.set(3).unwrap();
    assert_eq!(calls.get(), 0);

    store.flush();
    assert_eq!(calls.get(), 1);
    assert_eq!(store.get_key("a"), Some(json!(2)));
    assert_eq!(store.get_key("b"), Some(json!(3)));
}

/// Writing the same value back produces no notification.
#[test]
fn unchanged_value_is_not_a_change() {
    let a = atom(5);
    let store = Store::builder().atom("a", &a).build().unwrap();
    let (calls, listener) = counter();
    a.sub(listener).unwrap();

    a.set(5).unwrap();
    store.flush();
    assert_eq!(calls.get(), 0);

    a.set(6).unwrap();
    a.set(5).unwrap();
    store.flush();
    assert_eq!(calls.get(), 0);
}

/// Writes made by listeners are delivered within the same flush.
#[test]
fn listener_writes_cascade_within_flush() {
    let source = atom(0);
    let mirror = atom(0);
    let store = Store::builder()
        .atom("source", &source)
        .atom("mirror", &mirror)
        .build()
        .unwrap();

    let writer = mirror.clone();
    let reader = source.clone();
    source
        .sub(move || {
            let value = reader.get_untracked().unwrap_or(Value::Null);
            writer.set(value).unwrap();
        })
        .unwrap();
    let (calls, listener) = counter();
    mirror.sub(listener).unwrap();

    source.set(7).unwrap();
    store.flush();
    assert_eq!(store.get_key("mirror"), Some(json!(7)));
    assert_eq!(calls.get(), 1);
    assert!(!store.has_pending());
}

/// The snapshot is reused until something visible changes.
#[test]
fn snapshot_identity_follows_changes() {
    let a = atom(1);
    let store = Store::builder().atom("a", &a).build().unwrap();

    let first = store.get_all();
    assert!(Rc::ptr_eq(&first, &store.get_all()));

    a.set(1).unwrap();
    assert!(Rc::ptr_eq(&first, &store.get_all()));

    a.set(2).unwrap();
    let second = store.get_all();
    assert!(!Rc::ptr_eq(&first, &second));
    assert_eq!(second.get("a"), Some(&json!(2)));
}

// ----------------------------------------------------------------------------
// Selects
// ----------------------------------------------------------------------------

/// A select subscribes to the atoms it read, through nested selects.
#[test]
fn select_deps_are_transitive() {
    let count = atom(1);
    let unrelated = atom(0);
    let double = doubled(&count);
    let quad = select({
        let double = double.clone();
        move |_: &()| Ok(json!(int(double.get(&())?) * 2))
    });

    let store = Store::builder()
        .atom("count", &count)
        .atom("unrelated", &unrelated)
        .select("double", &double)
        .select("quad", &quad)
        .build()
        .unwrap();

    assert_eq!(quad.get(&()).unwrap(), json!(4));
    assert_eq!(quad.deps(), Some(vec!["count".to_string()]));

    let (calls, listener) = counter();
    quad.sub(&(), listener).unwrap();

    unrelated.set(1).unwrap();
    store.flush();
    assert_eq!(calls.get(), 0);

    count.set(3).unwrap();
    store.flush();
    assert_eq!(calls.get(), 1);
    assert_eq!(quad.get(&()).unwrap(), json!(12));
}

/// A parameterized select reads different atoms per argument.
#[test]
fn parameterized_select() {
    let left = atom("L");
    let right = atom("R");
    let side = select({
        let left = left.clone();
        let right = right.clone();
        move |which: &bool| if *which { left.get() } else { right.get() }
    });

    Store::builder()
        .atom("left", &left)
        .atom("right", &right)
        .select("side", &side)
        .build()
        .unwrap();

    assert_eq!(side.get(&true).unwrap(), json!("L"));
    assert_eq!(side.call(false).get().unwrap(), json!("R"));
}

/// A dynamic select subscribes to what its argument reads.
#[test]
fn dynamic_select_follows_argument() {
    let left = atom(1);
    let right = atom(2);
    let side = select_with(
        {
            let left = left.clone();
            let right = right.clone();
            move |which: &bool| if *which { left.get() } else { right.get() }
        },
        SelectOptions::new().dynamic(),
    );

    let store = Store::builder()
        .atom("left", &left)
        .atom("right", &right)
        .select("side", &side)
        .build()
        .unwrap();

    let (calls, listener) = counter();
    let unsub = side.sub(&false, listener).unwrap();
    assert_eq!(unsub.keys().to_vec(), vec!["right".to_string()]);

    left.set(10).unwrap();
    store.flush();
    assert_eq!(calls.get(), 0);

    right.set(20).unwrap();
    store.flush();
    assert_eq!(calls.get(), 1);
}

/// A writable select forwards writes to atoms.
#[test]
fn writable_select() {
    let celsius = atom(0);
    let fahrenheit = select_with(
        {
            let celsius = celsius.clone();
            move |_: &()| Ok(json!(int(celsius.get()?) * 9 / 5 + 32))
        },
        SelectOptions::new().setter({
            let celsius = celsius.clone();
            move |_: &(), value: Value| celsius.set(json!((int(value) - 32) * 5 / 9))
        }),
    );

    let store = Store::builder()
        .atom("celsius", &celsius)
        .select("fahrenheit", &fahrenheit)
        .build()
        .unwrap();

    fahrenheit.set(&(), 212).unwrap();
    store.flush();
    assert_eq!(celsius.get().unwrap(), json!(100));
    assert_eq!(fahrenheit.get(&()).unwrap(), json!(212));
}

// ----------------------------------------------------------------------------
// Derived values
// ----------------------------------------------------------------------------

/// Derived values recompute on dependency change and chain within a flush.
#[test]
fn derived_values_chain() {
    let price = atom(10);
    let quantity = atom(2);
    let subtotal = derived([&price, &quantity], |v| Ok(json!(int(v[0].clone()) * int(v[1].clone()))));
    let total = derived([&subtotal], |v| Ok(json!(int(v[0].clone()) + 5)));

    let store = Store::builder()
        .group("cart", |g| {
            g.atom("price", &price)
                .atom("quantity", &quantity)
                .derived("subtotal", &subtotal)
                .derived("total", &total)
        })
        .build()
        .unwrap();

    assert_eq!(total.get().unwrap(), json!(25));
    let (calls, listener) = counter();
    total.sub(listener).unwrap();

    price.set(20).unwrap();
    quantity.set(3).unwrap();
    store.flush();
    assert_eq!(store.get_key("cart.total"), Some(json!(65)));
    assert_eq!(calls.get(), 1);
}

// ----------------------------------------------------------------------------
// Path accessors
// ----------------------------------------------------------------------------

/// Only related paths are notified by a path write.
#[test]
fn path_writes_notify_related_paths_only() {
    let root = atom(json!({ "B": { "BB": { "BBA": 1, "BBB": 2 } }, "C": 0 }));
    let store = Store::builder().atom("root", &root).build().unwrap();
    let paths = PathAccessor::new(&root);

    let (bba_calls, bba) = counter();
    let (bbb_calls, bbb) = counter();
    let (b_calls, b) = counter();
    let (c_calls, c) = counter();
    paths.sub("B.BB.BBA", bba).unwrap();
    paths.sub("B.BB.BBB", bbb).unwrap();
    paths.sub("B", b).unwrap();
    paths.sub("C", c).unwrap();

    paths.set("B.BB.BBA", 10).unwrap();
    store.flush();

    assert_eq!(bba_calls.get(), 1);
    assert_eq!(b_calls.get(), 1);
    assert_eq!(bbb_calls.get(), 0);
    assert_eq!(c_calls.get(), 0);
    assert_eq!(paths.get("B.BB.BBA").unwrap(), json!(10));
    assert_eq!(root.get().unwrap()["B"]["BB"]["BBB"], json!(2));
}

/// Accessors over the same atom see each other's paths and writes.
#[test]
fn accessors_share_path_versions() {
    let profile = atom(json!({ "name": "ada", "address": { "city": "x" } }));
    let store = Store::builder().atom("profile", &profile).build().unwrap();
    let view = PathAccessor::new(&profile);
    let editor = PathAccessor::new(&profile);

    let (city_calls, city) = counter();
    let (name_calls, name) = counter();
    view.sub("address.city", city).unwrap();
    view.sub("name", name).unwrap();
    assert_eq!(editor.get("address.city").unwrap(), json!("x"));

    editor.set("address", json!({ "city": "y" })).unwrap();
    store.flush();
    assert_eq!(city_calls.get(), 1);
    assert_eq!(name_calls.get(), 0);
    assert_eq!(view.get("address.city").unwrap(), json!("y"));
    assert_eq!(view.version("address.city").unwrap(), 1);
}

/// A failed build releases its members for the next one.
#[test]
fn build_can_be_retried_after_failure() {
    let a = atom(1);
    let b = atom(2);
    let err = Store::builder()
        .atom("same", &a)
        .atom("same", &b)
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateName(_)));

    let store = Store::builder().atom("a", &a).atom("b", &b).build().unwrap();
    a.set(10).unwrap();
    store.flush();
    assert_eq!(store.get_key("a"), Some(json!(10)));
    assert_eq!(b.get().unwrap(), json!(2));
}

/// Strict accessors refuse to cross scalars; lenient ones create objects.
#[test]
fn path_strictness() {
    let strict_root = atom(json!({ "a": 1 }));
    let lenient_root = atom(json!({ "a": 1 }));
    let store = Store::builder()
        .atom("strict", &strict_root)
        .atom("lenient", &lenient_root)
        .build()
        .unwrap();

    let strict = PathAccessor::new(&strict_root);
    assert!(matches!(
        strict.set("a.b", 2).unwrap_err(),
        Error::PathStructure { .. }
    ));

    let lenient = PathAccessor::with_options(
        &lenient_root,
        PathOptions {
            strict: false,
            ..PathOptions::default()
        },
    );
    lenient.set("x.y", 3).unwrap();
    store.flush();
    assert_eq!(lenient_root.get().unwrap(), json!({ "a": 1, "x": { "y": 3 } }));
}

// ----------------------------------------------------------------------------
// Definitions and errors
// ----------------------------------------------------------------------------

/// Members fail clearly when used before their store exists.
#[test]
fn use_before_setup_is_an_error() {
    let loose = atom(0);
    let loose_select = doubled(&loose);

    assert!(loose.get().unwrap_err().is_uninitialized());
    assert!(loose_select.get(&()).unwrap_err().is_uninitialized());
    assert!(PathAccessor::new(&loose).get("x").unwrap_err().is_uninitialized());
}

/// Group keys and custom configuration shape the store's key space.
#[test]
fn grouped_definition_with_config() {
    let theme = atom("dark");
    let volume = atom(3);
    let store = Store::builder()
        .config(StoreConfig {
            group_separator: "/".into(),
            ..StoreConfig::default()
        })
        .group("settings", |g| {
            g.atom("theme", &theme)
                .group("audio", |g| g.atom("volume", &volume))
        })
        .build()
        .unwrap();

    let keys: Vec<String> = {
        let mut keys: Vec<String> = store.get_all().keys().cloned().collect();
        keys.sort();
        keys
    };
    assert_eq!(keys, vec!["settings/audio/volume", "settings/theme"]);
}

/// A panicking listener does not stop the others.
#[test]
fn listener_panic_is_isolated() {
    let a = atom(0);
    let store = Store::builder().atom("a", &a).build().unwrap();

    a.sub(|| panic!("listener failure")).unwrap();
    let (calls, listener) = counter();
    a.sub(listener).unwrap();

    a.set(1).unwrap();
    store.flush();
    assert_eq!(calls.get(), 1);
}

// ----------------------------------------------------------------------------
// Schedulers
// ----------------------------------------------------------------------------

/// A queued scheduler flushes when its queue is run.
#[test]
fn queued_scheduler_flushes() {
    let queue = QueuedFlush::new();
    let a = atom(0);
    let store = Store::builder()
        .scheduler(queue.clone())
        .atom("a", &a)
        .build()
        .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    let reader = a.clone();
    a.sub(move || {
        seen_clone
            .borrow_mut()
            .push(reader.get_untracked().unwrap_or(Value::Null));
    })
    .unwrap();

    a.set(1).unwrap();
    a.set(2).unwrap();
    assert_eq!(queue.len(), 1);

    queue.run_pending();
    assert_eq!(*seen.borrow(), vec![json!(2)]);
    assert!(!store.has_pending());
}

/// A local task scheduler flushes once the writing task yields.
#[tokio::test]
async fn local_task_scheduler_flushes() {
    let local = tokio::task::LocalSet::new();
    let a = atom(0);
    let store = Store::builder()
        .scheduler(LocalTaskFlush)
        .atom("a", &a)
        .build()
        .unwrap();

    let (calls, listener) = counter();
    a.sub(listener).unwrap();

    local
        .run_until(async {
            a.set(1).unwrap();
            a.set(2).unwrap();
            assert_eq!(calls.get(), 0);
        })
        .await;
    local.await;

    assert_eq!(calls.get(), 1);
    assert_eq!(store.get_key("a"), Some(json!(2)));
    assert!(!store.has_pending());
}
