//! Calls across the boundary, and the supervision every execution runs
//! under.

use super::{BridgeState, convert};
use crate::error::{BridgeError, JsException, Result};
use crate::host::HostValue;
use crate::watchdog::Watchdog;
use smallvec::SmallVec;

/// Run `$run` inside a `TryCatch` with the watchdog armed, then map the
/// value with `$done`, or turn what was caught into `BridgeError::Js`.
///
/// ```ignore
/// supervised!(scope, state, timeout, |tc| script.run(&mut tc), |value| {
///     convert::from_v8(&mut tc, state, value)
/// })
/// ```
macro_rules! supervised {
    ($scope:expr, $state:expr, $timeout:expr, |$tc:ident| $run:expr, |$value:ident| $done:expr) => {{
        let guard = std::pin::pin!(v8::TryCatch::new($scope));
        let mut $tc = guard.init();

        match $crate::bridge::call::arm($state, $timeout) {
            Err(e) => Err(e),
            Ok(watchdog) => {
                let result = $run;
                let timed_out = $crate::bridge::call::disarm($state, watchdog);

                match result {
                    Some($value) => $done,
                    None => {
                        let terminated = timed_out || $tc.has_terminated();
                        let exception = $tc.exception();
                        let stack = $tc.stack_trace();

                        Err($crate::bridge::call::exception(
                            &mut $tc, $state, exception, stack, terminated, timed_out,
                        ))
                    }
                }
            }
        }
    }};
}

pub(crate) use supervised;

/// Arm a watchdog on the state's engine.
///
/// Nested executions run under the outermost one's deadline and get an idle
/// watchdog.
pub(crate) fn arm(state: &BridgeState, timeout: f64) -> Result<Watchdog> {
    let timeout = if state.engine.is_nested() { 0.0 } else { timeout };
    Ok(Watchdog::arm(state.engine.thread_safe_handle(), timeout)?)
}

/// Disarm, and clear a termination that fired so the next execution runs.
pub(crate) fn disarm(state: &BridgeState, watchdog: Watchdog) -> bool {
    let fired = watchdog.disarm();

    if fired {
        state.engine.thread_safe_handle().cancel_terminate_execution();
    }

    fired
}

/// Build the error for a failed execution.
pub(crate) fn exception(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    exception: Option<v8::Local<v8::Value>>,
    stack: Option<v8::Local<v8::Value>>,
    terminated: bool,
    timed_out: bool,
) -> BridgeError {
    if terminated {
        // A nested execution lets the termination unwind to the outermost
        if !state.engine.is_nested() {
            state.engine.thread_safe_handle().cancel_terminate_execution();
        }
        tracing::debug!("Execution terminated (timed_out={})", timed_out);
        return JsException::terminated(timed_out).into();
    }

    let Some(exception) = exception else {
        return JsException {
            message: "Uncaught exception".to_string(),
            stack: None,
            value: HostValue::Undefined,
            timed_out: false,
        }
        .into();
    };

    let message = exception
        .to_string(scope)
        .map(|s| s.to_rust_string_lossy(scope))
        .unwrap_or_else(|| "Uncaught exception".to_string());

    let stack = stack
        .filter(|stack| stack.is_string())
        .map(|stack| stack.to_rust_string_lossy(scope));

    let value = convert::from_v8(scope, state, exception).unwrap_or_default();

    JsException {
        message,
        stack,
        value,
        timed_out: false,
    }
    .into()
}

/// `function.bind(null, ...bound)` through the primitive captured when the
/// context was created.
pub(crate) fn bind<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    function: v8::Local<v8::Function>,
    bound: &[v8::Local<v8::Value>],
) -> Result<v8::Local<'s, v8::Function>> {
    let primitive = v8::Local::new(scope, &state.bind);

    let mut args: SmallVec<[v8::Local<v8::Value>; 16]> = SmallVec::with_capacity(bound.len() + 1);
    args.push(v8::null(scope).into());
    args.extend_from_slice(bound);

    let bound = primitive
        .call(scope, function.into(), &args)
        .ok_or_else(|| BridgeError::InvalidState("Function.prototype.bind failed".into()))?;

    v8::Local::<v8::Function>::try_from(bound)
        .map_err(|_| BridgeError::InvalidState("bind did not return a function".into()))
}

/// Call `function` with host arguments, supervised.
pub(crate) fn invoke(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    function: v8::Local<v8::Function>,
    this: v8::Local<v8::Value>,
    args: &[HostValue],
    timeout: f64,
) -> Result<HostValue> {
    let argv = convert::to_v8_args(scope, state, args)?;

    supervised!(
        scope,
        state,
        timeout,
        |tc| function.call(&mut tc, this, &argv),
        |value| convert::from_v8(&mut tc, state, value)
    )
}
