//! Object identity cache and proxy registry.
//!
//! Every host value that crosses into V8 as a proxy gets a registry entry:
//! the strong host handle plus a weak handle on the V8 proxy. The entry
//! lives exactly as long as V8 keeps the proxy reachable. When the proxy is
//! collected its finalizer records the id in the context's
//! `FinalizationQueue`, and the entry is reaped on the next operation.
//!
//! The identity cache sits on top: host identity -> proxy id, so a host
//! object crossing twice yields the same proxy. Hosts that are not weakly
//! referenceable are registered but never cached.

use crate::error::{BridgeError, Result};
use crate::gc::{FinalizationQueue, ProxyId};
use crate::host::{HostFunction, HostObject};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// The host side of a proxy.
#[derive(Clone)]
pub(crate) enum HostHandle {
    Object(Rc<dyn HostObject>),
    Function(HostFunction),
}

impl HostHandle {
    fn identity(&self) -> usize {
        match self {
            Self::Object(object) => crate::host::object_identity(object),
            Self::Function(function) => function.identity(),
        }
    }

    fn cacheable(&self) -> bool {
        match self {
            Self::Object(object) => object.weakly_referenceable(),
            Self::Function(_) => true,
        }
    }
}

struct ProxyEntry {
    host: HostHandle,
    proxy: v8::Weak<v8::Object>,
}

/// Per-context registry of live proxies.
pub(crate) struct ProxyRegistry {
    entries: HashMap<ProxyId, ProxyEntry>,
    next_id: ProxyId,
    finalized: Arc<FinalizationQueue>,
}

impl ProxyRegistry {
    pub fn new(finalized: Arc<FinalizationQueue>) -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
            finalized,
        }
    }

    /// Reserve an id for a proxy about to be created.
    pub fn allocate(&mut self) -> ProxyId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Track `proxy` as the V8 side of `host`.
    pub fn insert(
        &mut self,
        scope: &mut v8::PinScope,
        id: ProxyId,
        host: HostHandle,
        proxy: v8::Local<v8::Object>,
    ) {
        let queue = self.finalized.clone();
        let weak = v8::Weak::with_finalizer(scope, proxy, Box::new(move |_| queue.push(id)));

        self.entries.insert(id, ProxyEntry { host, proxy: weak });
    }

    pub fn get(&self, id: ProxyId) -> Option<HostHandle> {
        self.entries.get(&id).map(|entry| entry.host.clone())
    }

    pub fn proxy<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
        id: ProxyId,
    ) -> Option<v8::Local<'s, v8::Object>> {
        self.entries.get(&id)?.proxy.to_local(scope)
    }

    /// Drop the entries of collected proxies. Returns the removed hosts'
    /// identities, for the cache.
    pub fn forget(&mut self, ids: &[ProxyId]) -> Vec<(usize, ProxyId)> {
        ids.iter()
            .filter_map(|id| {
                self.entries
                    .remove(id)
                    .map(|entry| (entry.host.identity(), *id))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Host identity -> proxy id.
#[derive(Default)]
pub(crate) struct IdentityCache {
    index: HashMap<usize, ProxyId>,
}

impl IdentityCache {
    pub fn lookup(&self, identity: usize) -> Option<ProxyId> {
        self.index.get(&identity).copied()
    }

    pub fn store(&mut self, host: &HostHandle, id: ProxyId) {
        if host.cacheable() {
            self.index.insert(host.identity(), id);
        }
    }

    /// Remove entries, leaving any that were replaced by a newer proxy.
    pub fn evict(&mut self, removed: &[(usize, ProxyId)]) {
        for (identity, id) in removed {
            if self.index.get(identity) == Some(id) {
                self.index.remove(identity);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }
}

pub(crate) fn cache_error(what: &str) -> BridgeError {
    BridgeError::InvalidState(format!("identity cache {} while in use", what))
}

/// Shorthand used by the converter: look up a live proxy for `host`.
pub(crate) fn lookup<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &super::BridgeState,
    host: &HostHandle,
) -> Result<Option<v8::Local<'s, v8::Object>>> {
    let id = match state.cache.try_borrow() {
        Ok(cache) => cache.lookup(host.identity()),
        Err(_) => {
            crate::unraisable::report("identity cache lookup", &cache_error("lookup"));
            return Ok(None);
        }
    };

    let Some(id) = id else {
        return Ok(None);
    };

    let registry = state
        .registry
        .try_borrow()
        .map_err(|_| BridgeError::InvalidState("proxy registry in use".into()))?;

    Ok(registry.proxy(scope, id))
}

/// Shorthand used by the converter: remember `id` as the proxy of `host`.
pub(crate) fn store(state: &super::BridgeState, host: &HostHandle, id: ProxyId) {
    match state.cache.try_borrow_mut() {
        Ok(mut cache) => cache.store(host, id),
        Err(_) => crate::unraisable::report("identity cache store", &cache_error("store")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostModule, HostValue};

    struct Opaque;

    impl HostObject for Opaque {
        fn class_name(&self) -> &str {
            "Opaque"
        }

        fn get(&self, _key: &str) -> Option<HostValue> {
            None
        }

        fn keys(&self) -> Vec<String> {
            Vec::new()
        }

        fn weakly_referenceable(&self) -> bool {
            false
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_cache_skips_non_weakly_referenceable() {
        let mut cache = IdentityCache::default();
        let opaque = HostHandle::Object(Rc::new(Opaque));
        let module = HostHandle::Object(Rc::new(HostModule::new("m")));

        cache.store(&opaque, 1);
        cache.store(&module, 2);

        assert_eq!(cache.lookup(opaque.identity()), None);
        assert_eq!(cache.lookup(module.identity()), Some(2));
    }

    #[test]
    fn test_evict_keeps_newer_entry() {
        let mut cache = IdentityCache::default();
        let module = HostHandle::Object(Rc::new(HostModule::new("m")));
        let identity = module.identity();

        cache.store(&module, 1);
        cache.store(&module, 2);

        cache.evict(&[(identity, 1)]);
        assert_eq!(cache.lookup(identity), Some(2));

        cache.evict(&[(identity, 2)]);
        assert_eq!(cache.lookup(identity), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_function_identity() {
        let f = HostFunction::new("f", |_| Ok(HostValue::Undefined));
        let a = HostHandle::Function(f.clone());
        let b = HostHandle::Function(f);

        assert_eq!(a.identity(), b.identity());
        assert!(a.cacheable());
    }

    #[test]
    fn test_registry_ids_are_unique() {
        let mut registry = ProxyRegistry::new(Arc::new(FinalizationQueue::new()));

        let a = registry.allocate();
        let b = registry.allocate();

        assert_ne!(a, b);
        assert_eq!(registry.len(), 0);
        assert!(registry.forget(&[a, b]).is_empty());
    }
}
