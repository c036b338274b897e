//! Reporting channel for errors that have no caller to return to.
//!
//! GC finalization and promise trampolines run outside of any host call,
//! so their failures are reported here instead of being propagated.
//! By default they are logged; a per-thread hook can capture them.

use crate::error::BridgeError;
use std::cell::RefCell;
use std::rc::Rc;

pub type UnraisableHook = Rc<dyn Fn(&str, &BridgeError)>;

thread_local! {
    static HOOK: RefCell<Option<UnraisableHook>> = const { RefCell::new(None) };
}

/// Install a hook for the current thread, returning the previous one.
pub fn set_hook(hook: Option<UnraisableHook>) -> Option<UnraisableHook> {
    HOOK.with(|h| h.replace(hook))
}

/// Report an error raised in `origin`.
pub fn report(origin: &str, error: &BridgeError) {
    // Clone out so the hook may call set_hook itself
    let hook = HOOK.with(|h| h.borrow().clone());

    match hook {
        Some(hook) => hook(origin, error),
        None => log::error!("Exception ignored in {}: {}", origin, error),
    }
}
