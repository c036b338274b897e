//! Value conversion between `HostValue` and `v8::Value`.
//!
//! Primitives and arrays are copied. Host objects and functions go through
//! their proxies, so they come back as the same `Rc`. Anything else created
//! by scripts comes back as a `JsObject` / `JsFunction` handle.

use super::cache::HostHandle;
use super::{BridgeState, JsFunction, JsObject, proxy};
use crate::error::{BridgeError, Result};
use crate::host::HostValue;
use smallvec::SmallVec;

pub(crate) type Args<'s> = SmallVec<[v8::Local<'s, v8::Value>; 16]>;

pub(crate) fn v8_string<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    value: &str,
) -> Result<v8::Local<'s, v8::String>> {
    v8::String::new(scope, value).ok_or_else(|| {
        BridgeError::InvalidState(format!("string of {} bytes is too long", value.len()))
    })
}

pub(crate) fn to_v8<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    value: &HostValue,
) -> Result<v8::Local<'s, v8::Value>> {
    let value = match value {
        HostValue::Undefined => v8::undefined(scope).into(),
        HostValue::Null => v8::null(scope).into(),
        HostValue::Bool(b) => v8::Boolean::new(scope, *b).into(),
        HostValue::Number(n) => v8::Number::new(scope, *n).into(),
        HostValue::String(s) => v8_string(scope, s)?.into(),
        HostValue::Array(items) => {
            let elements = to_v8_args(scope, state, items)?;
            v8::Array::new_with_elements(scope, &elements).into()
        }
        HostValue::Object(object) => proxy::object_proxy(scope, state, object)?.into(),
        HostValue::Function(function) => proxy::function_proxy(scope, state, function)?.into(),
        HostValue::JsObject(object) => object.to_local(scope, state)?.into(),
        HostValue::JsFunction(function) => function.to_local(scope, state)?.into(),
    };

    Ok(value)
}

/// Convert call arguments. Up to 16 stay on the stack.
pub(crate) fn to_v8_args<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    values: &[HostValue],
) -> Result<Args<'s>> {
    let mut args = Args::with_capacity(values.len());

    for value in values {
        args.push(to_v8(scope, state, value)?);
    }

    Ok(args)
}

pub(crate) fn from_v8(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    value: v8::Local<v8::Value>,
) -> Result<HostValue> {
    if value.is_undefined() {
        return Ok(HostValue::Undefined);
    }

    if value.is_null() {
        return Ok(HostValue::Null);
    }

    if value.is_boolean() {
        return Ok(HostValue::Bool(value.boolean_value(scope)));
    }

    if value.is_number() {
        return Ok(HostValue::Number(value.number_value(scope).unwrap_or(f64::NAN)));
    }

    if value.is_big_int() {
        // Precision beyond f64 is lost
        let number = v8::Local::<v8::BigInt>::try_from(value)
            .map(|b| b.i64_value().0 as f64)
            .unwrap_or(f64::NAN);
        return Ok(HostValue::Number(number));
    }

    if value.is_string() {
        return Ok(HostValue::String(value.to_rust_string_lossy(scope)));
    }

    if let Ok(array) = v8::Local::<v8::Array>::try_from(value) {
        let array = v8::Local::new(scope, array);
        return copy_array(scope, state, array, &mut SmallVec::new());
    }

    if let Ok(function) = v8::Local::<v8::Function>::try_from(value) {
        if let Some(HostHandle::Function(host)) = host_handle(scope, state, function.into())? {
            return Ok(HostValue::Function(host));
        }

        return Ok(HostValue::JsFunction(JsFunction::new(
            scope, state, function, None,
        )));
    }

    if let Ok(proxy) = v8::Local::<v8::Proxy>::try_from(value) {
        let target = proxy.get_target(scope);

        if let Ok(target) = v8::Local::<v8::Object>::try_from(target)
            && let Some(HostHandle::Object(host)) = host_handle(scope, state, target)?
        {
            return Ok(HostValue::Object(host));
        }
    }

    let object = value
        .to_object(scope)
        .ok_or_else(|| BridgeError::type_error("value cannot be converted to an object"))?;

    Ok(HostValue::JsObject(JsObject::new(scope, state, object)))
}

/// Copy a JS array element by element. Holes read as `undefined`.
///
/// `path` holds the arrays being copied, outermost first; meeting one of
/// them again is a cycle, which cannot be copied.
fn copy_array<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    array: v8::Local<'s, v8::Array>,
    path: &mut SmallVec<[v8::Local<'s, v8::Array>; 8]>,
) -> Result<HostValue> {
    if path.iter().any(|seen| seen.strict_equals(array.into())) {
        return Err(BridgeError::type_error("cannot convert a cyclic array"));
    }

    path.push(array);
    let mut items = Vec::with_capacity(array.length() as usize);

    for i in 0..array.length() {
        let element = array
            .get_index(scope, i)
            .ok_or_else(|| BridgeError::InvalidState(format!("array element {} unreadable", i)))?;

        let item = match v8::Local::<v8::Array>::try_from(element) {
            Ok(nested) => copy_array(scope, state, nested, path)?,
            Err(_) => from_v8(scope, state, element)?,
        };

        items.push(item);
    }

    path.pop();
    Ok(HostValue::Array(items))
}

/// The host value behind a proxy target or host function, if any.
///
/// Looked up in the registry of the context that created `object`, which
/// need not be `state`'s: values travel between contexts of one engine.
pub(crate) fn host_handle(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    object: v8::Local<v8::Object>,
) -> Result<Option<HostHandle>> {
    let owner = BridgeState::owner(scope, object);
    let state = owner.as_deref().unwrap_or(state);

    let Some(id) = state.proxy_id(scope, object) else {
        return Ok(None);
    };

    let registry = state
        .registry
        .try_borrow()
        .map_err(|_| BridgeError::InvalidState("proxy registry in use".into()))?;

    Ok(registry.get(id))
}
