//! Garbage-collection plumbing shared by all contexts.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  V8 GC                                                      │
//! │  └── weak finalizer of a collected proxy                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ push(id)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  FinalizationQueue                                          │
//! │  ├── Mutex<VecDeque<ProxyId>> + pending counter             │
//! │  └── drained on the next bridge operation                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ drain()
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ProxyRegistry (per context)                                │
//! │  └── drops the host handle and the identity cache entry     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod finalization;

pub use finalization::{FinalizationQueue, ProxyId};
