//! Deferred reclamation of collected proxies.
//!
//! When V8 collects a proxy that stands for a host object, its weak
//! finalizer runs in the middle of a garbage collection. Touching the
//! identity cache or dropping host values from there is not safe, so the
//! finalizer only records the proxy id here. The owning context drains the
//! queue the next time it takes the execution lock.
//!
//! ```ignore
//! let queue = Arc::new(FinalizationQueue::new());
//!
//! // From a weak finalizer
//! queue.push(proxy_id);
//!
//! // On the next bridge operation
//! for id in queue.drain()? {
//!     registry.forget(id);
//! }
//! ```

use crate::error::{BridgeError, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a proxy in a context's registry.
pub type ProxyId = u64;

/// Queue of proxy ids whose V8 object was collected.
pub struct FinalizationQueue {
    queue: Mutex<VecDeque<ProxyId>>,

    /// Fast check for pending items (avoids lock acquisition on hot path)
    pending_count: AtomicU64,
}

impl Default for FinalizationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalizationQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(8)),
            pending_count: AtomicU64::new(0),
        }
    }

    /// Record a collected proxy.
    ///
    /// Called from GC finalizers, so it never panics: a poisoned queue
    /// drops the id and logs.
    pub fn push(&self, id: ProxyId) {
        match self.queue.lock() {
            Ok(mut queue) => {
                queue.push_back(id);
                self.pending_count.fetch_add(1, Ordering::Release);
                tracing::trace!("Proxy {} collected (pending: {})", id, self.len());
            }
            Err(_) => {
                log::error!("Finalization queue poisoned, proxy {} will leak", id);
            }
        }
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.pending_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    /// Take every pending id.
    pub fn drain(&self) -> Result<Vec<ProxyId>> {
        // Fast path: nothing collected since the last drain
        if !self.has_pending() {
            return Ok(Vec::new());
        }

        let ids: Vec<ProxyId> = {
            let mut queue = self
                .queue
                .lock()
                .map_err(|_| BridgeError::InvalidState("finalization queue poisoned".into()))?;
            queue.drain(..).collect()
        };

        self.pending_count
            .fetch_sub(ids.len() as u64, Ordering::Release);

        tracing::trace!("Drained {} collected proxies", ids.len());

        Ok(ids)
    }
}

impl std::fmt::Debug for FinalizationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizationQueue")
            .field("pending_count", &self.len())
            .finish()
    }
}
