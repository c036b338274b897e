//! Promise -> host future bridging.
//!
//! The two trampolines are created once per context. For every pending
//! promise they are bound to the id of a parked future, so the callback
//! V8 eventually makes is `trampoline(id, value)`.
//!
//! ```text
//!   async_call ──> result is a promise?
//!                    no ──────────────> set_result(value)
//!                    fulfilled ───────> set_result(result)
//!                    rejected ────────> set_exception(reason)
//!                    pending ──> park(future) = id
//!                                then(fulfilled.bind(null, id),
//!                                     rejected.bind(null, id))
//! ```

use super::call::{self, supervised};
use super::{BridgeState, convert};
use crate::error::{BridgeError, Result};
use crate::host::{HostFuture, HostValue};
use std::rc::Rc;

pub(crate) fn fulfilled_trampoline(
    scope: &mut v8::PinScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    settle(scope, &args, true);
}

pub(crate) fn rejected_trampoline(
    scope: &mut v8::PinScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    settle(scope, &args, false);
}

/// Deliver a settlement to the parked future. Failures have no caller to
/// go to and are reported as unraisable.
fn settle(scope: &mut v8::PinScope, args: &v8::FunctionCallbackArguments, fulfilled: bool) {
    let Some(state) = BridgeState::current(scope) else {
        crate::unraisable::report("promise settlement", &BridgeError::Destroyed);
        return;
    };

    let Some(id) = args.get(0).number_value(scope) else {
        return;
    };

    // Already delivered, or dropped with the context
    let Some(future) = state.take_future(id as u64) else {
        return;
    };

    let delivered = match convert::from_v8(scope, &state, args.get(1)) {
        Ok(value) if fulfilled => future.set_result(value),
        Ok(reason) => future.set_exception(reason),
        Err(e) => future.set_exception(HostValue::String(e.to_string())),
    };

    if let Err(e) = delivered {
        crate::unraisable::report("promise settlement", &e);
    }

    tracing::trace!("Settled future {} (fulfilled={})", id, fulfilled);
}

/// Settle `future` from `value` now, or attach it to `value` when it is a
/// pending promise.
pub(crate) fn settle_or_attach(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    value: v8::Local<v8::Value>,
    future: Rc<dyn HostFuture>,
) -> Result<()> {
    let Ok(promise) = v8::Local::<v8::Promise>::try_from(value) else {
        let value = convert::from_v8(scope, state, value)?;
        return future.set_result(value);
    };

    match promise.state() {
        v8::PromiseState::Fulfilled => {
            let result = promise.result(scope);
            future.set_result(convert::from_v8(scope, state, result)?)
        }
        v8::PromiseState::Rejected => {
            promise.mark_as_handled();
            let reason = promise.result(scope);
            future.set_exception(convert::from_v8(scope, state, reason)?)
        }
        v8::PromiseState::Pending => {
            let id = state.park_future(future);

            attach(scope, state, promise, id).inspect_err(|_| {
                state.take_future(id);
            })
        }
    }
}

fn attach(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    promise: v8::Local<v8::Promise>,
    id: u64,
) -> Result<()> {
    let id_value: v8::Local<v8::Value> = v8::Number::new(scope, id as f64).into();

    let fulfilled = v8::Local::new(scope, &state.fulfilled);
    let rejected = v8::Local::new(scope, &state.rejected);

    let on_fulfilled = call::bind(scope, state, fulfilled, &[id_value])?;
    let on_rejected = call::bind(scope, state, rejected, &[id_value])?;

    promise
        .then2(scope, on_fulfilled, on_rejected)
        .ok_or_else(|| BridgeError::InvalidState("failed to attach promise reactions".into()))?;

    tracing::trace!("Parked future {} on a pending promise", id);

    Ok(())
}

/// Call `function` and route its outcome to `future`, supervised.
pub(crate) fn invoke_async(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    function: v8::Local<v8::Function>,
    this: v8::Local<v8::Value>,
    args: &[HostValue],
    future: Rc<dyn HostFuture>,
    timeout: f64,
) -> Result<()> {
    let argv = convert::to_v8_args(scope, state, args)?;

    supervised!(
        scope,
        state,
        timeout,
        |tc| function.call(&mut tc, this, &argv),
        |value| settle_or_attach(&mut tc, state, value, future)
    )
}
