use super::cache::{IdentityCache, ProxyRegistry};
use super::{promise, proxy};
use crate::engine::Engine;
use crate::error::{BridgeError, Result};
use crate::gc::{FinalizationQueue, ProxyId};
use crate::host::HostFuture;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Per-context bridge state.
///
/// Stored in the V8 context slot, so any callback holding only the V8
/// context recovers it with `BridgeState::current`. The slot is set once
/// when the context is created and removed when it is destroyed.
pub(crate) struct BridgeState {
    /// The context this state belongs to
    pub context: v8::Global<v8::Context>,

    /// Default timeout in seconds (<= 0 = unbounded)
    pub timeout: Cell<f64>,

    /// Promise trampolines, bound per call to a pending-future id
    pub fulfilled: v8::Global<v8::Function>,
    pub rejected: v8::Global<v8::Function>,

    /// `Function.prototype.bind` as it was when the context was created
    pub bind: v8::Global<v8::Function>,

    /// Trap handler shared by every host object proxy
    pub handler: v8::Global<v8::Object>,

    /// Private key holding the proxy id on proxy targets and host functions.
    /// Unique to this context.
    pub proxy_key: v8::Global<v8::Private>,

    pub cache: RefCell<IdentityCache>,
    pub registry: RefCell<ProxyRegistry>,
    pub finalized: Arc<FinalizationQueue>,

    pending: RefCell<HashMap<u64, Rc<dyn HostFuture>>>,
    next_future_id: Cell<u64>,

    // Last field: every V8 handle above must drop before the isolate can
    pub engine: Engine,
}

impl BridgeState {
    /// Build the state for the context currently entered in `scope`.
    pub fn new(scope: &mut v8::PinScope, engine: Engine, timeout: f64) -> Result<Rc<Self>> {
        let context = scope.get_current_context();

        let fulfilled = v8::Function::new(scope, promise::fulfilled_trampoline)
            .ok_or_else(|| construction("promise trampoline"))?;
        let rejected = v8::Function::new(scope, promise::rejected_trampoline)
            .ok_or_else(|| construction("promise trampoline"))?;

        let bind = bind_primitive(scope)?;
        let handler = proxy::trap_handler(scope)?;

        // One key per context: ids are only meaningful to their own registry
        let key_name = v8::String::new(scope, "proxy_id").ok_or_else(|| construction("proxy key"))?;
        let proxy_key = v8::Private::new(scope, Some(key_name));

        let finalized = Arc::new(FinalizationQueue::new());

        Ok(Rc::new(Self {
            context: v8::Global::new(scope, context),
            timeout: Cell::new(timeout),
            fulfilled: v8::Global::new(scope, fulfilled),
            rejected: v8::Global::new(scope, rejected),
            bind: v8::Global::new(scope, bind),
            handler: v8::Global::new(scope, handler),
            proxy_key: v8::Global::new(scope, proxy_key),
            cache: RefCell::new(IdentityCache::default()),
            registry: RefCell::new(ProxyRegistry::new(finalized.clone())),
            finalized,
            pending: RefCell::new(HashMap::new()),
            next_future_id: Cell::new(1),
            engine,
        }))
    }

    /// State of the context currently entered in `scope`.
    pub fn current(scope: &mut v8::PinScope) -> Option<Rc<Self>> {
        scope.get_current_context().get_slot::<Self>()
    }

    /// State of the context that created `object`, if it is still live.
    pub fn owner(scope: &mut v8::PinScope, object: v8::Local<v8::Object>) -> Option<Rc<Self>> {
        object.get_creation_context(scope)?.get_slot::<Self>()
    }

    /// Apply collected proxies to the registry and the identity cache.
    ///
    /// Runs at the start of every operation. Failures are reported, never
    /// propagated.
    pub fn reap(&self) {
        let ids = match self.finalized.drain() {
            Ok(ids) => ids,
            Err(e) => {
                crate::unraisable::report("proxy finalization", &e);
                return;
            }
        };

        if ids.is_empty() {
            return;
        }

        let removed = match self.registry.try_borrow_mut() {
            Ok(mut registry) => registry.forget(&ids),
            Err(_) => {
                crate::unraisable::report(
                    "proxy finalization",
                    &BridgeError::InvalidState("proxy registry in use".into()),
                );
                return;
            }
        };

        match self.cache.try_borrow_mut() {
            Ok(mut cache) => cache.evict(&removed),
            Err(_) => crate::unraisable::report(
                "proxy finalization",
                &super::cache::cache_error("eviction"),
            ),
        }

        tracing::trace!("Reaped {} collected proxies", removed.len());
    }

    pub fn proxy_key<'s>(&self, scope: &mut v8::PinScope<'s, '_>) -> v8::Local<'s, v8::Private> {
        v8::Local::new(scope, &self.proxy_key)
    }

    /// Proxy id stored on `object`, if it stands for a host value.
    pub fn proxy_id(&self, scope: &mut v8::PinScope, object: v8::Local<v8::Object>) -> Option<ProxyId> {
        let key = self.proxy_key(scope);
        let value = object.get_private(scope, key)?;

        if !value.is_number() {
            return None;
        }

        value.number_value(scope).map(|n| n as ProxyId)
    }

    /// Park a future until its promise settles.
    pub fn park_future(&self, future: Rc<dyn HostFuture>) -> u64 {
        let id = self.next_future_id.get();
        self.next_future_id.set(id + 1);
        self.pending.borrow_mut().insert(id, future);
        id
    }

    /// Take a parked future. Only the first caller gets it.
    pub fn take_future(&self, id: u64) -> Option<Rc<dyn HostFuture>> {
        self.pending.borrow_mut().remove(&id)
    }

    pub fn pending_futures(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn live_proxies(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Release everything that keeps host values alive.
    pub fn clear(&self) {
        // Drop outside of the borrows: host destructors may re-enter
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        drop(pending);

        if let Ok(mut cache) = self.cache.try_borrow_mut() {
            cache.clear();
        }

        let registry = self.registry.try_borrow_mut().map(|mut registry| {
            std::mem::replace(&mut *registry, ProxyRegistry::new(self.finalized.clone()))
        });
        drop(registry);
    }
}

fn construction(what: &str) -> BridgeError {
    BridgeError::Construction(format!("failed to create {}", what))
}

/// Look up `Function.prototype.bind`.
fn bind_primitive<'s>(scope: &mut v8::PinScope<'s, '_>) -> Result<v8::Local<'s, v8::Function>> {
    let global = scope.get_current_context().global(scope);

    let mut value: v8::Local<v8::Value> = global.into();

    for name in ["Function", "prototype", "bind"] {
        let object = value
            .to_object(scope)
            .ok_or_else(|| construction("bind primitive"))?;
        let key = v8::String::new(scope, name).ok_or_else(|| construction("bind primitive"))?;
        value = object
            .get(scope, key.into())
            .ok_or_else(|| construction("bind primitive"))?;
    }

    v8::Local::<v8::Function>::try_from(value).map_err(|_| construction("bind primitive"))
}
