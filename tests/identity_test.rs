mod common;

use common::Counter;
use openworkers_bridge_v8::{Context, Engine, HostFunction, HostObject, HostValue};
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn test_same_host_object_same_proxy() {
    let ctx = common::context();
    let counter = HostValue::object(Counter::default());

    ctx.setitem("a", counter.clone()).unwrap();
    ctx.setitem("b", counter).unwrap();

    assert_eq!(ctx.eval("a === b").unwrap().as_bool(), Some(true));
    assert_eq!(ctx.cached_proxies(), 1);
}

#[test]
fn test_round_trip_returns_same_host_object() {
    let ctx = common::context();
    let counter = HostValue::object(Counter::default());

    ctx.setitem("counter", counter.clone()).unwrap();
    let back = ctx.eval("counter").unwrap();

    assert!(back.same_object(&counter));
    assert!(back.downcast_ref::<Counter>().is_some());
}

#[test]
fn test_host_function_round_trip() {
    let ctx = common::context();
    let sum = HostValue::from(common::sum_function());

    ctx.setitem("sum", sum.clone()).unwrap();

    assert!(ctx.getitem("sum").unwrap().same_object(&sum));
    assert_eq!(ctx.eval("sum(1, 2, 3)").unwrap().as_number(), Some(6.0));
    assert_eq!(ctx.eval("sum === sum").unwrap().as_bool(), Some(true));
}

struct Ephemeral;

impl HostObject for Ephemeral {
    fn class_name(&self) -> &str {
        "Ephemeral"
    }

    fn get(&self, key: &str) -> Option<HostValue> {
        (key == "kind").then(|| HostValue::from("ephemeral"))
    }

    fn keys(&self) -> Vec<String> {
        vec!["kind".to_string()]
    }

    fn weakly_referenceable(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn test_non_weakly_referenceable_gets_fresh_proxy() {
    let ctx = common::context();
    let ephemeral = HostValue::object(Ephemeral);

    ctx.setitem("a", ephemeral.clone()).unwrap();
    ctx.setitem("b", ephemeral.clone()).unwrap();

    assert_eq!(ctx.eval("a === b").unwrap().as_bool(), Some(false));
    assert_eq!(ctx.eval("a.kind").unwrap().as_str(), Some("ephemeral"));
    assert_eq!(ctx.cached_proxies(), 0);

    // Still the same object on the way back
    assert!(ctx.getitem("b").unwrap().same_object(&ephemeral));
}

#[test]
fn test_js_object_identity_is_preserved() {
    let ctx = common::context();
    let object = ctx.eval("var shared = {}; shared").unwrap();

    ctx.setitem("alias", object.clone()).unwrap();

    assert_eq!(ctx.eval("alias === shared").unwrap().as_bool(), Some(true));

    let again = ctx.getitem("shared").unwrap();
    assert!(
        object
            .as_js_object()
            .unwrap()
            .same(again.as_js_object().unwrap())
            .unwrap()
    );
}

#[test]
fn test_gc_releases_unreachable_host_objects() {
    let ctx = common::context();
    let created = Rc::new(Cell::new(0));
    let created_clone = created.clone();

    let make = HostFunction::new("make", move |_| {
        created_clone.set(created_clone.get() + 1);
        Ok(HostValue::object(Counter::default()))
    });
    ctx.setitem("make", make).unwrap();

    ctx.eval("for (let i = 0; i < 20; i++) make().value").unwrap();
    assert_eq!(created.get(), 20);

    let before = ctx.cached_proxies();
    assert!(before >= 20);

    ctx.gc().unwrap();

    let after = ctx.cached_proxies();
    assert!(after < before, "expected fewer than {} proxies, got {}", before, after);
}

#[test]
fn test_reachable_host_object_survives_gc() {
    let ctx = common::context();
    let counter = Counter::default();
    counter.value.set(7.0);

    ctx.setitem("kept", HostValue::object(counter)).unwrap();
    ctx.gc().unwrap();

    assert_eq!(ctx.eval("kept.value").unwrap().as_number(), Some(7.0));
}

#[test]
fn test_proxies_keep_their_host_across_contexts() {
    let engine = Engine::new();
    let a = Context::builder().build(&engine).unwrap();
    let b = Context::builder().build(&engine).unwrap();

    let first = HostValue::object(Counter {
        label: "first".into(),
        ..Default::default()
    });
    let second = HostValue::object(Counter {
        label: "second".into(),
        ..Default::default()
    });
    let left = HostValue::from(HostFunction::new("left", |_| Ok("left".into())));
    let right = HostValue::from(HostFunction::new("right", |_| Ok("right".into())));

    // Same registration order in both contexts
    a.setitem("o", first.clone()).unwrap();
    a.setitem("f", left.clone()).unwrap();
    b.setitem("o", second.clone()).unwrap();
    b.setitem("f", right.clone()).unwrap();

    let wrapped = a.eval("({ p: o, g: f })").unwrap();
    b.setitem("w", wrapped).unwrap();

    assert!(b.eval("w.p").unwrap().same_object(&first));
    assert!(b.eval("w.g").unwrap().same_object(&left));
    assert_eq!(b.eval("w.p.label").unwrap().as_str(), Some("first"));
    assert_eq!(b.eval("w.g()").unwrap().as_str(), Some("left"));

    // B's own values are untouched
    assert!(b.eval("o").unwrap().same_object(&second));
    assert_eq!(b.eval("f()").unwrap().as_str(), Some("right"));
}

#[test]
fn test_destroyed_owner_leaves_plain_objects() {
    let engine = Engine::new();
    let a = Context::builder().build(&engine).unwrap();
    let b = Context::builder().build(&engine).unwrap();

    let counter = HostValue::object(Counter::default());
    a.setitem("o", counter.clone()).unwrap();
    b.setitem("o", HostValue::object(Counter::default())).unwrap();

    let wrapped = a.eval("({ p: o })").unwrap();
    b.setitem("w", wrapped).unwrap();
    a.destroy();

    // The proxy no longer maps to any host object, least of all B's
    let orphan = b.eval("w.p").unwrap();
    assert!(!orphan.same_object(&counter));
    assert!(orphan.downcast_ref::<Counter>().is_none());
}
