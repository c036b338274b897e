//! The embedded engine: one V8 isolate and its execution lock.
//!
//! An `Engine` is a cheap, clonable handle. Every context, script and
//! proxy created from it holds a clone, so the isolate outlives all of the
//! V8 handles that point into it.
//!
//! ## Execution lock
//!
//! All bridge operations take the lock for their whole duration. The
//! outermost operation borrows the isolate and records it as the active
//! one; a host callback running under that operation (reading a `JsObject`
//! it was handed, calling a `JsFunction` back) nests on the active isolate
//! instead of borrowing it again. Nested operations open their own handle
//! scopes, which V8 requires to be strictly nested, and they are.
//!
//! ## Isolate ordering
//!
//! V8 isolates are entered when created and must be dropped in reverse
//! creation order on a given thread. Keep at most one engine per thread,
//! or drop them last-created first.

use crate::config::EngineConfig;
use crate::error::{BridgeError, Result};
use crate::platform;
use std::cell::{Cell, RefCell, RefMut};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::pin::pin;
use std::ptr::NonNull;
use std::rc::Rc;

#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

struct EngineInner {
    /// Class name -> template, for host object proxy targets
    templates: RefCell<HashMap<String, v8::Global<v8::FunctionTemplate>>>,

    /// Thread-safe handle used by watchdogs
    handle: v8::IsolateHandle,

    config: EngineConfig,

    /// Isolate of the operation in progress, for nested operations
    active: Cell<Option<NonNull<v8::Isolate>>>,

    /// Lock nesting depth (0 = idle)
    depth: Cell<usize>,

    /// Contexts whose slot could not be released when they were destroyed
    detached: RefCell<Vec<v8::Global<v8::Context>>>,

    // Must stay the last field: the handles above drop first
    isolate: RefCell<v8::OwnedIsolate>,
}

/// Held for the duration of a bridge operation.
///
/// The outermost lock owns the isolate borrow; nested ones only bump the
/// depth. Same idea as a `JsLock` saving and restoring the current isolate.
pub(crate) struct ExecutionLock<'a> {
    inner: &'a EngineInner,
    isolate: NonNull<v8::Isolate>,
    borrow: Option<RefMut<'a, v8::OwnedIsolate>>,
}

impl Deref for ExecutionLock<'_> {
    type Target = v8::Isolate;

    fn deref(&self) -> &v8::Isolate {
        // SAFETY: the pointer comes from the outermost lock's borrow, which
        // outlives every lock nested in it
        unsafe { self.isolate.as_ref() }
    }
}

impl DerefMut for ExecutionLock<'_> {
    fn deref_mut(&mut self) -> &mut v8::Isolate {
        // SAFETY: as above; the thread only runs the innermost operation
        unsafe { self.isolate.as_mut() }
    }
}

impl Drop for ExecutionLock<'_> {
    fn drop(&mut self) {
        self.inner.depth.set(self.inner.depth.get().saturating_sub(1));

        if self.borrow.is_some() {
            self.inner.active.set(None);
        }
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        platform::get_platform();

        let mut isolate = v8::Isolate::new(config.create_params());

        // Promise reactions run when the outermost script or call returns
        isolate.set_microtasks_policy(v8::MicrotasksPolicy::Auto);

        let handle = isolate.thread_safe_handle();

        log::debug!(
            "Engine created (heap_max_mb={:?}, default_timeout={})",
            config.heap_max_mb,
            config.default_timeout
        );

        Self {
            inner: Rc::new(EngineInner {
                templates: RefCell::new(HashMap::new()),
                handle,
                config,
                active: Cell::new(None),
                depth: Cell::new(0),
                detached: RefCell::new(Vec::new()),
                isolate: RefCell::new(isolate),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Thread-safe handle to the isolate.
    pub fn thread_safe_handle(&self) -> v8::IsolateHandle {
        self.inner.handle.clone()
    }

    /// Forcibly stop whatever is running. Callable from any thread through
    /// `thread_safe_handle()`; this is the same mechanism the watchdog uses.
    pub fn terminate(&self) -> bool {
        self.inner.handle.terminate_execution()
    }

    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// True while an operation holds the execution lock.
    pub fn is_busy(&self) -> bool {
        self.inner.depth.get() > 0
    }

    /// True while an operation runs inside another one (a host callback
    /// using the engine).
    pub(crate) fn is_nested(&self) -> bool {
        self.inner.depth.get() > 1
    }

    /// Take the execution lock, nesting on the operation in progress if
    /// there is one.
    pub(crate) fn lock(&self) -> Result<ExecutionLock<'_>> {
        let inner = &*self.inner;

        let Ok(mut borrow) = inner.isolate.try_borrow_mut() else {
            // Borrowed outside of any operation
            let isolate = inner.active.get().ok_or(BridgeError::EngineBusy)?;
            inner.depth.set(inner.depth.get() + 1);

            return Ok(ExecutionLock {
                inner,
                isolate,
                borrow: None,
            });
        };

        let isolate = NonNull::from(&mut **borrow);
        inner.active.set(Some(isolate));
        inner.depth.set(1);

        let mut lock = ExecutionLock {
            inner,
            isolate,
            borrow: Some(borrow),
        };

        release_detached(inner, &mut lock);

        Ok(lock)
    }

    /// Release the slot of a destroyed context on the next outermost lock.
    pub(crate) fn detach(&self, context: v8::Global<v8::Context>) {
        self.inner.detached.borrow_mut().push(context);
    }

    /// Take the lock and enter `context` for the duration of `f`.
    pub(crate) fn enter<R, F>(&self, context: &v8::Global<v8::Context>, f: F) -> Result<R>
    where
        F: FnOnce(&mut v8::PinScope) -> Result<R>,
    {
        let mut isolate = self.lock()?;

        let scope = pin!(v8::HandleScope::new(&mut *isolate));
        let mut scope = scope.init();
        let context = v8::Local::new(&scope, context);
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        f(scope)
    }

    /// Cached template for a host class.
    pub(crate) fn class_template<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
        class_name: &str,
    ) -> Result<v8::Local<'s, v8::FunctionTemplate>> {
        if let Some(template) = self.inner.templates.borrow().get(class_name) {
            return Ok(v8::Local::new(scope, template));
        }

        let template = new_class_template(scope, class_name)?;

        self.inner
            .templates
            .borrow_mut()
            .insert(class_name.to_string(), v8::Global::new(scope, template));

        tracing::trace!("Created class template for {}", class_name);

        Ok(template)
    }

    /// Object template for the global object of a new context.
    ///
    /// Not cached: a global template is consumed by context creation.
    pub(crate) fn global_template<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_, ()>,
        class_name: &str,
    ) -> Result<v8::Local<'s, v8::ObjectTemplate>> {
        let template = new_class_template(scope, class_name)?;
        Ok(template.instance_template(scope))
    }

    /// Full garbage collection. Weak finalizers run before this returns.
    pub(crate) fn collect_garbage(&self) -> Result<()> {
        self.lock()?.low_memory_notification();
        tracing::trace!("Full GC requested");
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// Drop the bridge state of contexts destroyed while the engine could not
/// be locked.
fn release_detached(inner: &EngineInner, isolate: &mut v8::Isolate) {
    let detached = std::mem::take(&mut *inner.detached.borrow_mut());

    if detached.is_empty() {
        return;
    }

    let scope = pin!(v8::HandleScope::new(isolate));
    let scope = scope.init();

    for context in &detached {
        let context = v8::Local::new(&scope, context);

        if let Some(state) = context.remove_slot::<crate::bridge::BridgeState>() {
            state.clear();
        }
    }

    tracing::debug!("Released {} detached contexts", detached.len());
}

fn new_class_template<'s>(
    scope: &mut v8::PinScope<'s, '_, ()>,
    class_name: &str,
) -> Result<v8::Local<'s, v8::FunctionTemplate>> {
    let name = v8::String::new(scope, class_name)
        .ok_or_else(|| BridgeError::Construction(format!("invalid class name {}", class_name)))?;

    let template = v8::FunctionTemplate::new(scope, illegal_constructor);
    template.set_class_name(name);

    Ok(template)
}

/// Host classes cannot be instantiated from scripts.
fn illegal_constructor(
    scope: &mut v8::PinScope,
    _args: v8::FunctionCallbackArguments,
    _retval: v8::ReturnValue,
) {
    if let Some(message) = v8::String::new(scope, "Illegal constructor") {
        let exception = v8::Exception::type_error(scope, message);
        scope.throw_exception(exception);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeState;
    use crate::context::ContextBuilder;

    #[test]
    fn test_lock_nests_on_running_operation() {
        let engine = Engine::new();

        let outer = engine.lock().unwrap();
        assert!(engine.is_busy());
        assert!(!engine.is_nested());

        {
            let _inner = engine.lock().unwrap();
            assert!(engine.is_nested());
        }

        assert!(engine.is_busy());
        drop(outer);
        assert!(!engine.is_busy());

        // Released: the next lock borrows again
        assert!(engine.lock().is_ok());
    }

    #[test]
    fn test_borrow_outside_operation_is_busy() {
        let engine = Engine::new();
        let _borrow = engine.inner.isolate.borrow_mut();

        assert!(matches!(engine.lock(), Err(BridgeError::EngineBusy)));
        assert!(!engine.is_busy());
    }

    #[test]
    fn test_detached_slot_released_on_next_lock() {
        let engine = Engine::new();

        let context = {
            let mut isolate = engine.lock().unwrap();
            let scope = pin!(v8::HandleScope::new(&mut *isolate));
            let mut scope = scope.init();
            let context = v8::Context::new(&scope, Default::default());
            let scope = &mut v8::ContextScope::new(&mut scope, context);

            let state = BridgeState::new(scope, engine.clone(), 0.0).unwrap();
            context.set_slot(state);
            v8::Global::new(scope, context)
        };

        engine.detach(context.clone());
        assert_eq!(engine.inner.detached.borrow().len(), 1);

        let mut isolate = engine.lock().unwrap();
        assert!(engine.inner.detached.borrow().is_empty());

        let scope = pin!(v8::HandleScope::new(&mut *isolate));
        let scope = scope.init();
        let context = v8::Local::new(&scope, &context);
        assert!(context.get_slot::<BridgeState>().is_none());
    }

    #[test]
    fn test_context_destroyed_while_busy_is_detached() {
        let engine = Engine::new();
        let ctx = ContextBuilder::new().build(&engine).unwrap();

        {
            let _borrow = engine.inner.isolate.borrow_mut();
            ctx.destroy();
        }

        assert!(ctx.is_destroyed());
        assert_eq!(engine.inner.detached.borrow().len(), 1);

        drop(engine.lock().unwrap());
        assert!(engine.inner.detached.borrow().is_empty());
    }
}
