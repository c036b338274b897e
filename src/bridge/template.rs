//! Wiring of a host object as the global of a context.
//!
//! The context is created from the object template of the host class, so
//! `globalThis.constructor.name` is the class name. The host object itself
//! goes in as the prototype of the global object: names a script does not
//! define resolve through the host, and script globals stay on the global.

use super::{BridgeState, proxy};
use crate::error::{BridgeError, Result};
use crate::host::HostObject;
use std::rc::Rc;

pub(crate) fn install_global(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    host: &Rc<dyn HostObject>,
) -> Result<()> {
    let proxy = proxy::object_proxy(scope, state, host)?;
    let global = scope.get_current_context().global(scope);

    match global.set_prototype(scope, proxy.into()) {
        Some(true) => {
            tracing::trace!("Installed <{}> as global", host.class_name());
            Ok(())
        }
        _ => Err(BridgeError::Construction(format!(
            "cannot install <{}> as global",
            host.class_name()
        ))),
    }
}
