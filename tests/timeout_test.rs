mod common;

use openworkers_bridge_v8::{BridgeError, EvalOptions};
use std::time::{Duration, Instant};

// These tests spin the CPU until the watchdog fires, keep deadlines short.

#[test]
fn test_infinite_loop_times_out() {
    let ctx = common::context_with_timeout(0.2);

    let start = Instant::now();
    let err = ctx.eval("while (true) {}").unwrap_err();

    assert!(err.is_timeout(), "Expected timeout, got {:?}", err);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_context_survives_timeout() {
    let ctx = common::context_with_timeout(0.1);

    assert!(ctx.eval("while (true) {}").unwrap_err().is_timeout());

    // Termination must not leak into the next execution
    let result = ctx.eval("1 + 1").unwrap();
    assert_eq!(result.as_number(), Some(2.0));
}

#[test]
fn test_timeout_error_message() {
    let ctx = common::context_with_timeout(0.1);

    let err = ctx.eval("for (;;) {}").unwrap_err();
    let js = err.as_js().unwrap();

    assert!(js.timed_out);
    assert_eq!(js.message, "Execution timed out");
}

#[test]
fn test_per_eval_timeout_overrides_default() {
    // No default deadline
    let ctx = common::context();

    let err = ctx
        .eval_with("while (true) {}", EvalOptions::default().timeout(0.1))
        .unwrap_err();
    assert!(err.is_timeout());

    // Unbounded override on a bounded context
    ctx.set_timeout(0.05).unwrap();
    let result = ctx
        .eval_with(
            "let t = Date.now(); while (Date.now() - t < 150) {} 'done'",
            EvalOptions::default().timeout(0.0),
        )
        .unwrap();
    assert_eq!(result.as_str(), Some("done"));
}

#[test]
fn test_fast_script_not_flagged() {
    let ctx = common::context_with_timeout(5.0);

    let start = Instant::now();
    let result = ctx.eval("let s = 0; for (let i = 0; i < 1000; i++) s += i; s").unwrap();

    assert_eq!(result.as_number(), Some(499500.0));
    // Disarming must not wait for the deadline
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_js_function_call_is_supervised() {
    let ctx = common::context_with_timeout(0.1);

    let spin = ctx.eval("() => { while (true) {} }").unwrap();
    let err = spin.as_js_function().unwrap().call(&[]).unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(ctx.eval("'alive'").unwrap().as_str(), Some("alive"));
}

#[test]
fn test_async_call_is_supervised() {
    let ctx = common::context_with_timeout(0.1);

    let spin = ctx.eval("async () => { while (true) {} }").unwrap();
    let err = ctx.async_call_future(&spin, &[]).unwrap_err();

    assert!(err.is_timeout());
}

#[test]
fn test_external_terminate() {
    let ctx = common::context();
    let handle = ctx.engine().thread_safe_handle();

    let killer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        handle.terminate_execution();
    });

    let err = ctx.eval("while (true) {}").unwrap_err();
    killer.join().unwrap();

    match err {
        BridgeError::Js(js) => {
            assert!(!js.timed_out);
            assert_eq!(js.message, "Execution terminated");
        }
        other => panic!("Expected Js error, got {:?}", other),
    }

    assert_eq!(ctx.eval("3").unwrap().as_number(), Some(3.0));
}

#[test]
fn test_deadline_covers_script_callbacks() {
    use openworkers_bridge_v8::{HostFunction, HostValue};

    let ctx = common::context_with_timeout(0.2);

    let apply = HostFunction::new("apply", |args: &[HostValue]| {
        args[0]
            .as_js_function()
            .ok_or_else(|| BridgeError::type_error("callback is not a function"))?
            .call(&[])
    });
    ctx.setitem("apply", apply).unwrap();

    let start = Instant::now();
    let err = ctx.eval("apply(() => { while (true) {} })").unwrap_err();

    assert!(err.is_timeout(), "Expected timeout, got {:?}", err);
    assert!(start.elapsed() < Duration::from_secs(5));

    assert_eq!(ctx.eval("apply(() => 3)").unwrap().as_number(), Some(3.0));
}
