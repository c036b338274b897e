//! V8 proxies standing for host objects and host functions.
//!
//! A host object crosses as `new Proxy(target, handler)`: the target is a
//! fresh instance of the class template for the object's class name,
//! carrying the proxy id in a private property; the handler is shared by
//! every proxy of the context. A host function crosses as a native
//! function whose callback data is its proxy id.

use super::cache::{self, HostHandle};
use super::convert::{self, v8_string};
use super::BridgeState;
use crate::error::{BridgeError, Result};
use crate::gc::ProxyId;
use crate::host::{HostFunction, HostObject, HostValue};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::rc::Rc;

/// Build the trap handler shared by all host object proxies.
pub(crate) fn trap_handler<'s>(
    scope: &mut v8::PinScope<'s, '_>,
) -> Result<v8::Local<'s, v8::Object>> {
    let handler = v8::Object::new(scope);

    let traps = [
        ("get", v8::Function::new(scope, get_trap)),
        ("set", v8::Function::new(scope, set_trap)),
        ("has", v8::Function::new(scope, has_trap)),
        ("ownKeys", v8::Function::new(scope, own_keys_trap)),
        (
            "getOwnPropertyDescriptor",
            v8::Function::new(scope, descriptor_trap),
        ),
    ];

    for (name, trap) in traps {
        let trap = trap
            .ok_or_else(|| BridgeError::Construction(format!("failed to create {} trap", name)))?;
        let key = v8_string(scope, name)?;
        handler.set(scope, key.into(), trap.into());
    }

    Ok(handler)
}

/// Proxy for a host object, reusing the cached one when still alive.
pub(crate) fn object_proxy<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    object: &Rc<dyn HostObject>,
) -> Result<v8::Local<'s, v8::Object>> {
    let host = HostHandle::Object(object.clone());

    if let Some(proxy) = cache::lookup(scope, state, &host)? {
        return Ok(proxy);
    }

    let template = state.engine.class_template(scope, object.class_name())?;
    let target = template
        .instance_template(scope)
        .new_instance(scope)
        .ok_or_else(|| proxy_error(object.class_name()))?;

    let id = allocate(state)?;
    mark(scope, state, target, id);

    let handler = v8::Local::new(scope, &state.handler);
    let proxy: v8::Local<v8::Object> = v8::Proxy::new(scope, target, handler)
        .ok_or_else(|| proxy_error(object.class_name()))?
        .into();

    register(scope, state, id, host, proxy)?;

    tracing::trace!("Created proxy {} for <{}>", id, object.class_name());

    Ok(proxy)
}

/// Native function for a host function, reusing the cached one when still
/// alive.
pub(crate) fn function_proxy<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    function: &HostFunction,
) -> Result<v8::Local<'s, v8::Function>> {
    let host = HostHandle::Function(function.clone());

    if let Some(proxy) = cache::lookup(scope, state, &host)? {
        let proxy: v8::Local<v8::Value> = proxy.into();
        return v8::Local::<v8::Function>::try_from(proxy)
            .map_err(|_| BridgeError::InvalidState("cached proxy is not a function".into()));
    }

    let id = allocate(state)?;
    let data = v8::Number::new(scope, id as f64);

    let proxy = v8::Function::builder(call_host_function)
        .data(data.into())
        .build(scope)
        .ok_or_else(|| proxy_error(function.name()))?;

    if !function.name().is_empty() {
        let name = v8_string(scope, function.name())?;
        proxy.set_name(name);
    }

    mark(scope, state, proxy.into(), id);
    register(scope, state, id, host, proxy.into())?;

    Ok(proxy)
}

/// Throw `error` into V8.
///
/// `Type` becomes a `TypeError`, `Js` rethrows the original value when it
/// can cross back, anything else is a plain `Error`.
pub(crate) fn throw(scope: &mut v8::PinScope, state: Option<&BridgeState>, error: BridgeError) {
    // Termination unwinds on its own, nothing can be thrown over it
    if scope.is_execution_terminating() {
        return;
    }

    let original = match (&error, state) {
        (BridgeError::Js(e), Some(state)) if !e.value.is_undefined() => {
            convert::to_v8(scope, state, &e.value).ok()
        }
        _ => None,
    };

    if let Some(value) = original {
        scope.throw_exception(value);
        return;
    }

    let message = match &error {
        BridgeError::Type(message) => message.clone(),
        other => other.to_string(),
    };

    let Some(message) = v8::String::new(scope, &message) else {
        return;
    };

    let exception = match error {
        BridgeError::Type(_) => v8::Exception::type_error(scope, message),
        _ => v8::Exception::error(scope, message),
    };

    scope.throw_exception(exception);
}

fn proxy_error(name: &str) -> BridgeError {
    BridgeError::InvalidState(format!("failed to create proxy for <{}>", name))
}

fn allocate(state: &BridgeState) -> Result<ProxyId> {
    state
        .registry
        .try_borrow_mut()
        .map(|mut registry| registry.allocate())
        .map_err(|_| BridgeError::InvalidState("proxy registry in use".into()))
}

fn mark(scope: &mut v8::PinScope, state: &BridgeState, object: v8::Local<v8::Object>, id: ProxyId) {
    let key = state.proxy_key(scope);
    let value = v8::Number::new(scope, id as f64);
    object.set_private(scope, key, value.into());
}

fn register(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    id: ProxyId,
    host: HostHandle,
    proxy: v8::Local<v8::Object>,
) -> Result<()> {
    state
        .registry
        .try_borrow_mut()
        .map_err(|_| BridgeError::InvalidState("proxy registry in use".into()))?
        .insert(scope, id, host.clone(), proxy);

    cache::store(state, &host, id);
    Ok(())
}

/// Host object behind a proxy target.
fn target_host(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    target: v8::Local<v8::Object>,
) -> Option<Rc<dyn HostObject>> {
    match convert::host_handle(scope, state, target).ok()?? {
        HostHandle::Object(object) => Some(object),
        HostHandle::Function(_) => None,
    }
}

/// Common prologue of the traps: `(state, host, target)`.
///
/// Symbol keys and proxies whose host is gone yield no host, and the trap
/// falls back to the target.
fn trap_args<'a>(
    scope: &mut v8::PinScope,
    args: &v8::FunctionCallbackArguments<'a>,
) -> Option<(
    Rc<BridgeState>,
    Option<Rc<dyn HostObject>>,
    v8::Local<'a, v8::Object>,
)> {
    let state = BridgeState::current(scope)?;
    let target = v8::Local::<v8::Object>::try_from(args.get(0)).ok()?;
    let host = target_host(scope, &state, target);

    Some((state, host, target))
}

fn string_key(scope: &mut v8::PinScope, key: v8::Local<v8::Value>) -> Option<String> {
    key.is_string().then(|| key.to_rust_string_lossy(scope))
}

fn get_trap(scope: &mut v8::PinScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some((state, host, target)) = trap_args(scope, &args) else {
        return;
    };

    let key = args.get(1);

    if let (Some(host), Some(name)) = (host, string_key(scope, key))
        && let Some(value) = host.get(&name)
    {
        match convert::to_v8(scope, &state, &value) {
            Ok(value) => rv.set(value),
            Err(e) => throw(scope, Some(&state), e),
        }
        return;
    }

    if let Some(value) = target.get(scope, key) {
        rv.set(value);
    }
}

fn set_trap(scope: &mut v8::PinScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some((state, host, target)) = trap_args(scope, &args) else {
        return;
    };

    let key = args.get(1);
    let value = args.get(2);

    if let (Some(host), Some(name)) = (host, string_key(scope, key)) {
        let handled = convert::from_v8(scope, &state, value).and_then(|value| host.set(&name, value));

        match handled {
            Ok(true) => {
                rv.set_bool(true);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                throw(scope, Some(&state), e);
                return;
            }
        }
    }

    // Ordinary assignment lands on the receiver, which is the global object
    // when the proxy sits in its prototype chain
    let receiver = v8::Local::<v8::Object>::try_from(args.get(3)).unwrap_or(target);
    let Ok(key) = v8::Local::<v8::Name>::try_from(key) else {
        return;
    };

    let done = receiver.create_data_property(scope, key, value).unwrap_or(false);
    rv.set_bool(done);
}

fn has_trap(scope: &mut v8::PinScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some((_state, host, target)) = trap_args(scope, &args) else {
        return;
    };

    let key = args.get(1);

    if let (Some(host), Some(name)) = (host, string_key(scope, key))
        && host.has(&name)
    {
        rv.set_bool(true);
        return;
    }

    let found = target.has(scope, key).unwrap_or(false);
    rv.set_bool(found);
}

fn own_keys_trap(scope: &mut v8::PinScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some((_state, host, target)) = trap_args(scope, &args) else {
        return;
    };

    let mut seen = HashSet::new();
    let mut keys: SmallVec<[v8::Local<v8::Value>; 16]> = SmallVec::new();

    for name in host.map(|host| host.keys()).unwrap_or_default() {
        if seen.insert(name.clone())
            && let Some(key) = v8::String::new(scope, &name)
        {
            keys.push(key.into());
        }
    }

    let own = target.get_own_property_names(
        scope,
        v8::GetPropertyNamesArgs {
            key_conversion: v8::KeyConversionMode::ConvertToString,
            ..Default::default()
        },
    );

    if let Some(own) = own {
        for i in 0..own.length() {
            let Some(key) = own.get_index(scope, i) else {
                continue;
            };

            if seen.insert(key.to_rust_string_lossy(scope)) {
                keys.push(key);
            }
        }
    }

    rv.set(v8::Array::new_with_elements(scope, &keys).into());
}

fn descriptor_trap(scope: &mut v8::PinScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some((state, host, target)) = trap_args(scope, &args) else {
        return;
    };

    let key = args.get(1);

    if let (Some(host), Some(name)) = (host, string_key(scope, key))
        && let Some(value) = host.get(&name)
    {
        match descriptor(scope, &state, &value) {
            Ok(descriptor) => rv.set(descriptor.into()),
            Err(e) => throw(scope, Some(&state), e),
        }
        return;
    }

    let Ok(key) = v8::Local::<v8::Name>::try_from(key) else {
        return;
    };

    if let Some(descriptor) = target.get_own_property_descriptor(scope, key) {
        rv.set(descriptor);
    }
}

/// `{ value, writable, enumerable, configurable }` for a host attribute.
///
/// Reported configurable: the target never holds host attributes.
fn descriptor<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    value: &HostValue,
) -> Result<v8::Local<'s, v8::Object>> {
    let descriptor = v8::Object::new(scope);
    let value = convert::to_v8(scope, state, value)?;

    let fields: [(&str, v8::Local<v8::Value>); 4] = [
        ("value", value),
        ("writable", v8::Boolean::new(scope, true).into()),
        ("enumerable", v8::Boolean::new(scope, true).into()),
        ("configurable", v8::Boolean::new(scope, true).into()),
    ];

    for (name, field) in fields {
        let key = v8_string(scope, name)?;
        descriptor.set(scope, key.into(), field);
    }

    Ok(descriptor)
}

fn call_host_function(
    scope: &mut v8::PinScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let Some(state) = BridgeState::current(scope) else {
        throw(scope, None, BridgeError::Destroyed);
        return;
    };

    let function = args
        .data()
        .number_value(scope)
        .and_then(|id| state.registry.try_borrow().ok()?.get(id as ProxyId));

    let Some(HostHandle::Function(function)) = function else {
        throw(
            scope,
            Some(&state),
            BridgeError::InvalidState("host function is no longer registered".into()),
        );
        return;
    };

    let mut host_args: SmallVec<[HostValue; 16]> = SmallVec::with_capacity(args.length() as usize);

    for i in 0..args.length() {
        match convert::from_v8(scope, &state, args.get(i)) {
            Ok(value) => host_args.push(value),
            Err(e) => {
                throw(scope, Some(&state), e);
                return;
            }
        }
    }

    let result = function
        .call(&host_args)
        .and_then(|value| convert::to_v8(scope, &state, &value));

    match result {
        Ok(value) => rv.set(value),
        Err(e) => {
            tracing::debug!("Host function {} raised: {}", function.name(), e);
            throw(scope, Some(&state), e);
        }
    }
}
