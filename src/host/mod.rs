//! Host side of the bridge: values, objects, functions and futures.

mod field;
mod future;
mod value;

pub use field::{FromHostValue, HostField, ToHostValue};
pub use future::{FutureState, HostFuture, JsFuture};
pub use value::{HostClass, HostFunction, HostModule, HostObject, HostValue};

pub(crate) use value::object_identity;
