//! Execution-context bridge between a Rust host and embedded V8.
//!
//! ```ignore
//! use openworkers_bridge_v8::{Context, Engine, HostFunction, HostValue};
//!
//! let engine = Engine::new();
//! let ctx = Context::builder().timeout(1.0).build(&engine)?;
//!
//! ctx.setitem("add", HostFunction::new("add", |args| {
//!     let sum = args.iter().filter_map(HostValue::as_number).sum::<f64>();
//!     Ok(sum.into())
//! }))?;
//!
//! assert_eq!(ctx.eval("add(20, 22)")?.as_number(), Some(42.0));
//! ```
//!
//! One engine wraps one isolate and is bound to the thread that created it.
//! Keep one engine per thread, or drop them in reverse creation order.

pub mod bridge;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod gc;
pub mod host;
pub mod platform;
pub mod script;
pub mod unraisable;
pub mod watchdog;

// Core API
pub use bridge::{JsFunction, JsObject};
pub use config::EngineConfig;
pub use context::{Context, ContextBuilder, EvalOptions, GlobalDefinition, Program};
pub use engine::Engine;
pub use error::{BridgeError, JsException, Result};
pub use script::Script;

// Host side
pub use host::{
    FromHostValue, FutureState, HostClass, HostField, HostFunction, HostFuture, HostModule,
    HostObject, HostValue, JsFuture, ToHostValue,
};

pub use openworkers_host_derive::HostObject as DeriveHostObject;
