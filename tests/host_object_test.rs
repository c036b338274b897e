mod common;

use common::Counter;
use openworkers_bridge_v8::{BridgeError, HostFunction, HostValue, unraisable};
use std::cell::Cell;
use std::rc::Rc;

fn counter_context() -> (openworkers_bridge_v8::Context, HostValue) {
    let ctx = common::context();
    let counter = HostValue::object(Counter {
        label: "requests".into(),
        tags: vec!["a".into(), "b".into()],
        hidden: 99,
        ..Default::default()
    });

    ctx.setitem("counter", counter.clone()).unwrap();
    (ctx, counter)
}

#[test]
fn test_exposed_fields_readable() {
    let (ctx, _counter) = counter_context();

    assert_eq!(ctx.eval("counter.label").unwrap().as_str(), Some("requests"));
    assert_eq!(ctx.eval("counter.value").unwrap().as_number(), Some(0.0));
    assert_eq!(ctx.eval("counter.tagList.join(',')").unwrap().as_str(), Some("a,b"));
    assert!(ctx.eval("counter.hidden").unwrap().is_undefined());
    assert!(ctx.eval("counter.tags").unwrap().is_undefined());
}

#[test]
fn test_writable_field_updates_host() {
    let (ctx, counter) = counter_context();

    ctx.eval("counter.value += 5; counter.value *= 2").unwrap();

    let counter = counter.downcast_ref::<Counter>().unwrap();
    assert_eq!(counter.value.get(), 10.0);
}

#[test]
fn test_read_only_field_throws_in_script() {
    let (ctx, counter) = counter_context();

    let caught = ctx
        .eval(
            r#"
            try {
                counter.label = 'changed';
                'no error';
            } catch (e) {
                e.message;
            }
            "#,
        )
        .unwrap();

    assert!(caught.as_str().unwrap().contains("read-only"));
    assert_eq!(counter.downcast_ref::<Counter>().unwrap().label, "requests");
}

#[test]
fn test_wrong_type_assignment_is_type_error() {
    let (ctx, _counter) = counter_context();

    let name = ctx
        .eval("try { counter.value = 'x'; } catch (e) { e.constructor.name }")
        .unwrap();

    assert_eq!(name.as_str(), Some("TypeError"));
}

#[test]
fn test_script_properties_fall_through() {
    let (ctx, _counter) = counter_context();

    ctx.eval("counter.note = 'attached'").unwrap();

    assert_eq!(ctx.eval("counter.note").unwrap().as_str(), Some("attached"));
    assert_eq!(ctx.eval("'label' in counter").unwrap().as_bool(), Some(true));
    assert_eq!(ctx.eval("'hidden' in counter").unwrap().as_bool(), Some(false));
}

#[test]
fn test_keys_enumerate_exposed_fields() {
    let (ctx, _counter) = counter_context();

    let keys = ctx.eval("Object.keys(counter).join(',')").unwrap();
    assert_eq!(keys.as_str(), Some("value,label,tagList"));
}

#[test]
fn test_host_error_catchable_in_script() {
    let ctx = common::context();
    let fail = HostFunction::new("fail", |_| Err(BridgeError::host("backend down")));
    ctx.setitem("fail", fail).unwrap();

    let message = ctx
        .eval("try { fail(); 'unreachable' } catch (e) { e.message }")
        .unwrap();
    assert_eq!(message.as_str(), Some("backend down"));

    // Uncaught, it surfaces as a script exception
    let err = ctx.eval("fail()").unwrap_err();
    assert!(err.as_js().unwrap().message.contains("backend down"));
}

/// `apply(callback, ...args)`: calls a script function from the host.
fn apply_function() -> HostFunction {
    HostFunction::new("apply", |args| {
        let Some((callback, rest)) = args.split_first() else {
            return Err(BridgeError::type_error("apply() needs a callback"));
        };

        let callback = callback
            .as_js_function()
            .ok_or_else(|| BridgeError::type_error("callback is not a function"))?;

        callback.call(rest)
    })
}

#[test]
fn test_host_function_calls_script_callback() {
    let ctx = common::context();
    ctx.setitem("apply", apply_function()).unwrap();

    let product = ctx.eval("apply((x, y) => x * y, 6, 7)").unwrap();
    assert_eq!(product.as_number(), Some(42.0));

    // Callbacks nest: the inner apply runs inside the outer one
    let nested = ctx.eval("apply((n) => apply((m) => m + 1, n) * 2, 4)").unwrap();
    assert_eq!(nested.as_number(), Some(10.0));

    assert!(!ctx.engine().is_busy());
}

#[test]
fn test_callback_exception_reaches_calling_script() {
    let ctx = common::context();
    ctx.setitem("apply", apply_function()).unwrap();

    let caught = ctx
        .eval(
            r#"
            try {
                apply(() => { throw new RangeError('deep') });
                'unreachable';
            } catch (e) {
                e instanceof RangeError ? e.message : 'wrong type';
            }
            "#,
        )
        .unwrap();
    assert_eq!(caught.as_str(), Some("deep"));

    let err = ctx.eval("apply(() => { throw new RangeError('deep') })").unwrap_err();
    assert!(err.as_js().unwrap().message.contains("RangeError: deep"));

    // The context is still usable
    assert_eq!(ctx.eval("1 + 1").unwrap().as_number(), Some(2.0));
}

#[test]
fn test_host_function_reads_script_object() {
    let ctx = common::context();

    let describe = HostFunction::new("describe", |args| {
        let object = args[0]
            .as_js_object()
            .ok_or_else(|| BridgeError::type_error("expected an object"))?;

        let name = object.get("name")?;
        object.set("seen", true)?;

        Ok(HostValue::from(format!(
            "{}:{}",
            name.as_str().unwrap_or("?"),
            object.keys()?.len()
        )))
    });
    ctx.setitem("describe", describe).unwrap();

    let result = ctx.eval("var o = { name: 'job' }; describe(o) + ':' + o.seen").unwrap();
    assert_eq!(result.as_str(), Some("job:2:true"));
}

#[test]
fn test_host_function_receives_script_array() {
    let ctx = common::context();
    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
    let seen_clone = seen.clone();

    let collect = HostFunction::new("collect", move |args| {
        if let HostValue::Array(items) = &args[0] {
            *seen_clone.borrow_mut() = items.iter().filter_map(HostValue::as_number).collect();
        }
        Ok(HostValue::Undefined)
    });
    ctx.setitem("collect", collect).unwrap();

    ctx.eval("collect([1, 2, 3].map((x) => x * 10))").unwrap();
    assert_eq!(*seen.borrow(), vec![10.0, 20.0, 30.0]);
}

#[test]
fn test_host_function_receives_arguments() {
    let ctx = common::context();
    let seen = Rc::new(Cell::new(0));
    let seen_clone = seen.clone();

    let count = HostFunction::new("count", move |args| {
        seen_clone.set(args.len());
        Ok(HostValue::Undefined)
    });
    ctx.setitem("count", count).unwrap();

    ctx.eval("count(1, 'two', [3], { four: 4 }, null)").unwrap();
    assert_eq!(seen.get(), 5);
}

#[test]
fn test_illegal_constructor() {
    let (ctx, _counter) = counter_context();

    let name = ctx
        .eval("try { new counter.constructor() } catch (e) { e.constructor.name }")
        .unwrap();

    assert_eq!(name.as_str(), Some("TypeError"));
}

#[test]
fn test_unraisable_hook_sees_settlement_failures() {
    let ctx = common::context();
    let failures = Rc::new(Cell::new(0));
    let failures_clone = failures.clone();

    let previous = unraisable::set_hook(Some(Rc::new(move |_origin: &str, _err: &BridgeError| {
        failures_clone.set(failures_clone.get() + 1);
    })));

    struct Refusing;

    impl openworkers_bridge_v8::HostFuture for Refusing {
        fn set_result(&self, _value: HostValue) -> openworkers_bridge_v8::Result<()> {
            Err(BridgeError::host("refused"))
        }

        fn set_exception(&self, _error: HostValue) -> openworkers_bridge_v8::Result<()> {
            Err(BridgeError::host("refused"))
        }
    }

    ctx.eval("var go; var later = () => new Promise((r) => { go = r; })")
        .unwrap();
    let later = ctx.getitem("later").unwrap();
    ctx.async_call(&later, &[], || Refusing).unwrap();
    ctx.eval("go('value')").unwrap();

    unraisable::set_hook(previous);
    assert_eq!(failures.get(), 1);
}
