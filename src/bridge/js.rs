//! Host-side handles on objects and functions that live in V8.

use super::call::{self, supervised};
use super::{BridgeState, convert};
use crate::engine::Engine;
use crate::error::{BridgeError, Result};
use crate::host::HostValue;
use std::fmt;
use std::rc::Rc;

/// A V8 object seen from the host.
///
/// Holds a strong V8 handle: the object stays alive while the handle does.
/// Every operation takes the engine lock, nesting on the running one when
/// called from inside a host callback.
#[derive(Clone)]
pub struct JsObject {
    inner: Rc<JsObjectInner>,
}

struct JsObjectInner {
    context: v8::Global<v8::Context>,
    object: v8::Global<v8::Object>,
    engine: Engine,
}

impl JsObject {
    pub(crate) fn new(
        scope: &mut v8::PinScope,
        state: &BridgeState,
        object: v8::Local<v8::Object>,
    ) -> Self {
        Self {
            inner: Rc::new(JsObjectInner {
                context: state.context.clone(),
                object: v8::Global::new(scope, object),
                engine: state.engine.clone(),
            }),
        }
    }

    pub(crate) fn to_local<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
        state: &BridgeState,
    ) -> Result<v8::Local<'s, v8::Object>> {
        if !self.inner.engine.ptr_eq(&state.engine) {
            return Err(BridgeError::ForeignEngine);
        }

        Ok(v8::Local::new(scope, &self.inner.object))
    }

    /// Read a property. Functions come back bound to this object.
    pub fn get(&self, key: &str) -> Result<HostValue> {
        self.with(|scope, state, object| {
            let key = convert::v8_string(scope, key)?;

            supervised!(
                scope,
                state,
                state.timeout.get(),
                |tc| object.get(&mut tc, key.into()),
                |value| {
                    if let Ok(function) = v8::Local::<v8::Function>::try_from(value)
                        && !matches!(
                            convert::host_handle(&mut tc, state, function.into()),
                            Ok(Some(_))
                        )
                    {
                        Ok(HostValue::JsFunction(JsFunction::new(
                            &mut tc,
                            state,
                            function,
                            Some(object.into()),
                        )))
                    } else {
                        convert::from_v8(&mut tc, state, value)
                    }
                }
            )
        })
    }

    pub fn set(&self, key: &str, value: impl Into<HostValue>) -> Result<()> {
        let value = value.into();

        self.with(|scope, state, object| {
            let key = convert::v8_string(scope, key)?;
            let value = convert::to_v8(scope, state, &value)?;

            supervised!(
                scope,
                state,
                state.timeout.get(),
                |tc| object.set(&mut tc, key.into(), value),
                |_done| Ok(())
            )
        })
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        self.with(|scope, state, object| {
            let key = convert::v8_string(scope, key)?;

            supervised!(
                scope,
                state,
                state.timeout.get(),
                |tc| object.has(&mut tc, key.into()),
                |found| Ok(found)
            )
        })
    }

    /// Own enumerable string keys.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.with(|scope, state, object| {
            let args = v8::GetPropertyNamesArgs {
                key_conversion: v8::KeyConversionMode::ConvertToString,
                ..Default::default()
            };

            supervised!(
                scope,
                state,
                state.timeout.get(),
                |tc| object.get_own_property_names(&mut tc, args),
                |names| {
                    let mut keys = Vec::with_capacity(names.length() as usize);

                    for i in 0..names.length() {
                        if let Some(key) = names.get_index(&mut tc, i) {
                            keys.push(key.to_rust_string_lossy(&mut tc));
                        }
                    }

                    Ok(keys)
                }
            )
        })
    }

    /// `object[name](...args)`
    pub fn call_method(&self, name: &str, args: &[HostValue]) -> Result<HostValue> {
        match self.get(name)? {
            HostValue::JsFunction(function) => function.call(args),
            HostValue::Function(function) => function.call(args),
            other => Err(BridgeError::type_error(format!(
                "'{}' is not a function ({})",
                name,
                other.type_name()
            ))),
        }
    }

    /// Same V8 object (strict equality).
    pub fn same(&self, other: &JsObject) -> Result<bool> {
        if !self.inner.engine.ptr_eq(&other.inner.engine) {
            return Ok(false);
        }

        self.with(|scope, _state, object| {
            let other = v8::Local::new(scope, &other.inner.object);
            Ok(object.strict_equals(other.into()))
        })
    }

    fn with<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut v8::PinScope, &BridgeState, v8::Local<v8::Object>) -> Result<R>,
    {
        super::enter(&self.inner.engine, &self.inner.context, |scope, state| {
            let object = v8::Local::new(scope, &self.inner.object);
            f(scope, state, object)
        })
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsObject(..)")
    }
}

/// A V8 function seen from the host.
///
/// Calls run under the owning context's default timeout. A function read
/// off an object with `JsObject::get` keeps that object as `this`.
#[derive(Clone)]
pub struct JsFunction {
    inner: Rc<JsFunctionInner>,
}

struct JsFunctionInner {
    context: v8::Global<v8::Context>,
    function: v8::Global<v8::Function>,
    this: Option<v8::Global<v8::Value>>,
    engine: Engine,
}

impl JsFunction {
    pub(crate) fn new(
        scope: &mut v8::PinScope,
        state: &BridgeState,
        function: v8::Local<v8::Function>,
        this: Option<v8::Local<v8::Value>>,
    ) -> Self {
        Self {
            inner: Rc::new(JsFunctionInner {
                context: state.context.clone(),
                function: v8::Global::new(scope, function),
                this: this.map(|this| v8::Global::new(scope, this)),
                engine: state.engine.clone(),
            }),
        }
    }

    pub(crate) fn to_local<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
        state: &BridgeState,
    ) -> Result<v8::Local<'s, v8::Function>> {
        if !self.inner.engine.ptr_eq(&state.engine) {
            return Err(BridgeError::ForeignEngine);
        }

        Ok(v8::Local::new(scope, &self.inner.function))
    }

    /// `this` for calls: the object the function was read from, if any.
    pub(crate) fn receiver<'s>(&self, scope: &mut v8::PinScope<'s, '_>) -> v8::Local<'s, v8::Value> {
        match &self.inner.this {
            Some(this) => v8::Local::new(scope, this),
            None => v8::undefined(scope).into(),
        }
    }

    pub fn call(&self, args: &[HostValue]) -> Result<HostValue> {
        self.with(|scope, state, function| {
            let this = self.receiver(scope);
            call::invoke(scope, state, function, this, args, state.timeout.get())
        })
    }

    pub fn call_with_this(&self, this: &HostValue, args: &[HostValue]) -> Result<HostValue> {
        self.with(|scope, state, function| {
            let this = convert::to_v8(scope, state, this)?;
            call::invoke(scope, state, function, this, args, state.timeout.get())
        })
    }

    /// The function's `name`.
    pub fn name(&self) -> Result<String> {
        self.with(|scope, _state, function| Ok(function.get_name(scope).to_rust_string_lossy(scope)))
    }

    pub fn ptr_eq(&self, other: &JsFunction) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn with<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut v8::PinScope, &BridgeState, v8::Local<v8::Function>) -> Result<R>,
    {
        super::enter(&self.inner.engine, &self.inner.context, |scope, state| {
            let function = v8::Local::new(scope, &self.inner.function);
            f(scope, state, function)
        })
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsFunction(..)")
    }
}
