//! Execution contexts.
//!
//! A `Context` owns one V8 context of an engine and everything the bridge
//! keeps for it: trampolines, identity cache, proxy registry, pending
//! futures and the scripts it ran.
//!
//! ## Lifecycle
//!
//! ```text
//! ContextBuilder::build ──> live ──destroy()/Drop──> destroyed
//!                                                    (every op: Destroyed)
//! ```
//!
//! Host objects reachable from scripts stay alive while their proxies are
//! reachable. `gc()` forces a collection and releases the ones that are not.

mod builder;
mod eval;

pub use builder::{ContextBuilder, GlobalDefinition};
pub use eval::{EvalOptions, Program};

use crate::bridge::call::{self, supervised};
use crate::bridge::{self, BridgeState, JsFunction, JsObject, convert, promise, proxy};
use crate::engine::Engine;
use crate::error::{BridgeError, JsException, Result};
use crate::host::{FromHostValue, HostFuture, HostModule, HostObject, HostValue, JsFuture};
use crate::script::Script;
use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::pin::pin;
use std::rc::Rc;

/// Names `getattr`/`setattr` resolve on the context rather than the global.
const METHODS: &[&str] = &[
    "eval",
    "async_call",
    "bind",
    "expose",
    "expose_module",
    "gc",
    "destroy",
    "compile",
    "getattr",
    "setattr",
    "getitem",
    "setitem",
];

pub struct Context {
    inner: RefCell<Option<ContextInner>>,
    debug: Cell<bool>,

    // Last field: the context handle above must drop first
    engine: Engine,
}

struct ContextInner {
    context: v8::Global<v8::Context>,
    state: Rc<BridgeState>,

    /// Every script this context ran, kept for its lifetime
    scripts: RefCell<HashMap<usize, Script>>,

    host_global: Option<Rc<dyn HostObject>>,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Evaluate source text or a compiled script with the default timeout.
    pub fn eval<'a>(&self, program: impl Into<Program<'a>>) -> Result<HostValue> {
        self.eval_with(program, EvalOptions::default())
    }

    pub fn eval_with<'a>(
        &self,
        program: impl Into<Program<'a>>,
        options: EvalOptions,
    ) -> Result<HostValue> {
        let program = program.into();
        let inner = self.inner()?;
        let debug = self.debug.get();

        bridge::enter(&self.engine, &inner.context, |scope, state| {
            let script = eval::prepare(scope, state, program, options.filename.as_deref(), debug)?;
            register(&inner.scripts, &script);

            let timeout = options.timeout.unwrap_or_else(|| state.timeout.get());
            eval::run(scope, state, &script, timeout)
        })
    }

    /// Compile without running. The script can be evaluated repeatedly.
    pub fn compile(&self, source: &str, filename: Option<&str>) -> Result<Script> {
        let inner = self.inner()?;

        bridge::enter(&self.engine, &inner.context, |scope, state| {
            let script = Script::compile(scope, state, source, filename)?;
            register(&inner.scripts, &script);
            Ok(script)
        })
    }

    /// Call `function` and route its outcome to a future made by `factory`.
    ///
    /// The factory runs once the arguments are validated, so a rejected call
    /// has no side effect. A plain result or an already settled promise
    /// settles the future before this returns; a pending promise settles it
    /// when V8 runs its reactions.
    pub fn async_call<F, M>(
        &self,
        function: &HostValue,
        args: &[HostValue],
        factory: M,
    ) -> Result<Rc<F>>
    where
        F: HostFuture + 'static,
        M: FnOnce() -> F,
    {
        let HostValue::JsFunction(function) = function else {
            return Err(BridgeError::type_error("function is not a JSFunction"));
        };

        let inner = self.inner()?;
        let future = Rc::new(factory());

        bridge::enter(&self.engine, &inner.context, |scope, state| {
            let local = function.to_local(scope, state)?;
            let this = function.receiver(scope);

            promise::invoke_async(
                scope,
                state,
                local,
                this,
                args,
                future.clone(),
                state.timeout.get(),
            )
        })?;

        Ok(future)
    }

    /// `async_call` with a `JsFuture`.
    pub fn async_call_future(&self, function: &HostValue, args: &[HostValue]) -> Result<Rc<JsFuture>> {
        self.async_call(function, args, JsFuture::new)
    }

    /// Partially apply a host function.
    pub fn bind(&self, function: &HostValue, bound: &[HostValue]) -> Result<JsFunction> {
        if bound.is_empty() {
            return Err(BridgeError::type_error("bind() needs at least one argument to bind"));
        }

        let HostValue::Function(host) = function else {
            return Err(BridgeError::type_error(format!(
                "bind() target must be a host function, not {}",
                function.type_name()
            )));
        };

        let inner = self.inner()?;

        bridge::enter(&self.engine, &inner.context, |scope, state| {
            let target = proxy::function_proxy(scope, state, host)?;
            let args = convert::to_v8_args(scope, state, bound)?;
            let bound = call::bind(scope, state, target, &args)?;

            Ok(JsFunction::new(scope, state, bound, None))
        })
    }

    /// Publish host values as globals.
    ///
    /// Positional values go under their own name; every one of them is
    /// checked before anything is published. Names are defined on the global
    /// itself: setters and the host global behind it are not involved.
    pub fn expose(&self, objects: &[HostValue], named: &[(&str, HostValue)]) -> Result<()> {
        let names = objects
            .iter()
            .map(|object| {
                object.exposed_name().ok_or_else(|| {
                    BridgeError::type_error(format!(
                        "cannot expose a {} without a name",
                        object.type_name()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let inner = self.inner()?;

        bridge::enter(&self.engine, &inner.context, |scope, state| {
            let global = scope.get_current_context().global(scope);

            let entries = names
                .iter()
                .map(String::as_str)
                .zip(objects)
                .chain(named.iter().map(|(name, value)| (*name, value)));

            for (name, value) in entries {
                define_property(scope, state, global, name, value)?;
            }

            Ok(())
        })
    }

    /// Publish every public member of `module` (names not starting with
    /// `_`).
    pub fn expose_module(&self, module: &HostModule) -> Result<()> {
        let members = module.public_members();
        let named: Vec<(&str, HostValue)> = members
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone()))
            .collect();

        self.expose(&[], &named)
    }

    /// Full collection, then release host objects whose proxies died.
    pub fn gc(&self) -> Result<()> {
        let inner = self.inner()?;
        self.engine.collect_garbage()?;

        // Entering reaps
        bridge::enter(&self.engine, &inner.context, |_scope, state| {
            tracing::debug!("GC done, {} live proxies", state.live_proxies());
            Ok(())
        })
    }

    /// Run pending promise reactions now.
    pub fn run_microtasks(&self) -> Result<()> {
        let inner = self.inner()?;

        bridge::enter(&self.engine, &inner.context, |scope, state| {
            let watchdog = call::arm(state, state.timeout.get())?;
            scope.perform_microtask_checkpoint();

            if call::disarm(state, watchdog) {
                return Err(JsException::terminated(true).into());
            }

            Ok(())
        })
    }

    /// The global object.
    pub fn glob(&self) -> Result<JsObject> {
        let inner = self.inner()?;

        bridge::enter(&self.engine, &inner.context, |scope, state| {
            let global = scope.get_current_context().global(scope);
            Ok(JsObject::new(scope, state, global))
        })
    }

    /// The host object behind the global, if the context has one.
    pub fn host_global(&self) -> Result<Option<Rc<dyn HostObject>>> {
        Ok(self.inner()?.host_global.clone())
    }

    pub fn timeout(&self) -> Result<f64> {
        Ok(self.inner()?.state.timeout.get())
    }

    pub fn set_timeout(&self, secs: f64) -> Result<()> {
        self.inner()?.state.timeout.set(secs);
        Ok(())
    }

    /// Attribute access: context attributes first, then the global object.
    pub fn getattr(&self, name: &str) -> Result<HostValue> {
        match name {
            "timeout" => Ok(HostValue::Number(self.timeout()?)),
            "glob" => Ok(HostValue::JsObject(self.glob()?)),
            name if METHODS.contains(&name) => Err(BridgeError::type_error(format!(
                "'{}' is a method of Context",
                name
            ))),
            name => self.getitem(name),
        }
    }

    pub fn setattr(&self, name: &str, value: impl Into<HostValue>) -> Result<()> {
        match name {
            "timeout" => self.set_timeout(f64::from_host_value(value.into())?),
            name if name == "glob" || METHODS.contains(&name) => Err(BridgeError::ReadOnly(
                format!("attribute '{}' of 'Context' is read-only", name),
            )),
            name => self.setitem(name, value),
        }
    }

    /// Global lookup, bypassing context attributes.
    pub fn getitem(&self, name: &str) -> Result<HostValue> {
        self.glob()?.get(name)
    }

    pub fn setitem(&self, name: &str, value: impl Into<HostValue>) -> Result<()> {
        let value = value.into();
        let inner = self.inner()?;

        bridge::enter(&self.engine, &inner.context, |scope, state| {
            let global = scope.get_current_context().global(scope);
            set_property(scope, state, global, name, &value)
        })
    }

    pub fn debug(&self) -> bool {
        self.debug.get()
    }

    pub fn set_debug(&self, debug: bool) {
        self.debug.set(debug);
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.borrow().is_none()
    }

    pub fn script_count(&self) -> usize {
        self.inner
            .borrow()
            .as_ref()
            .map_or(0, |inner| inner.scripts.borrow().len())
    }

    /// Host objects currently indexed by the identity cache.
    pub fn cached_proxies(&self) -> usize {
        self.inner
            .borrow()
            .as_ref()
            .and_then(|inner| inner.state.cache.try_borrow().ok().map(|cache| cache.len()))
            .unwrap_or(0)
    }

    /// Promises still waiting to settle a future.
    pub fn pending_futures(&self) -> usize {
        self.inner
            .borrow()
            .as_ref()
            .map_or(0, |inner| inner.state.pending_futures())
    }

    /// Tear the context down. Idempotent.
    ///
    /// Called from inside a running script (a host callback holding the
    /// context) this does nothing, and `Drop` retries.
    pub fn destroy(&self) {
        let Ok(mut slot) = self.inner.try_borrow_mut() else {
            log::warn!("Context destroyed while in use, deferring");
            return;
        };

        let Some(inner) = slot.take() else {
            return;
        };

        drop(slot);

        match self.engine.lock() {
            Ok(mut isolate) => {
                let scope = pin!(v8::HandleScope::new(&mut *isolate));
                let scope = scope.init();
                let context = v8::Local::new(&scope, &inner.context);
                context.remove_slot::<BridgeState>();
            }
            Err(_) => {
                log::warn!("Engine busy while destroying context, releasing its slot later");
                self.engine.detach(inner.context.clone());
            }
        }

        let scripts = inner.scripts.borrow().len();
        inner.state.clear();
        drop(inner);

        tracing::debug!("Context destroyed ({} scripts released)", scripts);
    }

    fn inner(&self) -> Result<Ref<'_, ContextInner>> {
        Ref::filter_map(self.inner.borrow(), Option::as_ref).map_err(|_| BridgeError::Destroyed)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("destroyed", &self.is_destroyed())
            .field("debug", &self.debug.get())
            .field("scripts", &self.script_count())
            .finish()
    }
}

fn register(scripts: &RefCell<HashMap<usize, Script>>, script: &Script) {
    scripts
        .borrow_mut()
        .entry(script.identity())
        .or_insert_with(|| script.clone());
}

/// Own data property `name` on `object`.
fn define_property(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    object: v8::Local<v8::Object>,
    name: &str,
    value: &HostValue,
) -> Result<()> {
    let key = convert::v8_string(scope, name)?;
    let value = convert::to_v8(scope, state, value)?;

    supervised!(
        scope,
        state,
        state.timeout.get(),
        |tc| object.create_data_property(&mut tc, key.into(), value),
        |defined| if defined {
            Ok(())
        } else {
            Err(BridgeError::type_error(format!("cannot define global '{}'", name)))
        }
    )
}

/// `object[name] = value`, supervised: setters may run script code.
fn set_property(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    object: v8::Local<v8::Object>,
    name: &str,
    value: &HostValue,
) -> Result<()> {
    let key = convert::v8_string(scope, name)?;
    let value = convert::to_v8(scope, state, value)?;

    supervised!(
        scope,
        state,
        state.timeout.get(),
        |tc| object.set(&mut tc, key.into(), value),
        |_done| Ok(())
    )
}
