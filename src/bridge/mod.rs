//! The execution-context bridge.
//!
//! Everything here runs with the engine's execution lock held and a V8
//! context entered. The pieces:
//!
//! ```text
//!   host value ──convert::to_v8──> proxy::object_proxy ──> cache (identity)
//!        ^                                                    │
//!        └──────convert::from_v8 <── proxy id (private) <─────┘
//!
//!   call::invoke ──> watchdog armed ──> V8 ──> promise::settle_or_attach
//!                                                 │ pending
//!                                                 └─> trampolines ──> HostFuture
//! ```
//!
//! `BridgeState` ties it together and lives in the V8 context slot.

pub(crate) mod cache;
pub(crate) mod call;
pub(crate) mod convert;
mod js;
pub(crate) mod promise;
pub(crate) mod proxy;
mod state;
pub(crate) mod template;

pub use js::{JsFunction, JsObject};
pub(crate) use state::BridgeState;

use crate::engine::Engine;
use crate::error::{BridgeError, Result};

/// Take the engine lock, enter `context` and hand its bridge state to `f`.
///
/// Collected proxies are reaped before `f` runs.
pub(crate) fn enter<R, F>(engine: &Engine, context: &v8::Global<v8::Context>, f: F) -> Result<R>
where
    F: FnOnce(&mut v8::PinScope, &BridgeState) -> Result<R>,
{
    engine.enter(context, |scope| {
        let state = BridgeState::current(scope).ok_or(BridgeError::Destroyed)?;
        state.reap();
        f(scope, &state)
    })
}
