//! Global V8 platform initialization.
//!
//! V8 can only be initialized once per process. Every engine goes through
//! this entry point before creating its isolate.

use std::sync::OnceLock;

static PLATFORM: OnceLock<v8::SharedRef<v8::Platform>> = OnceLock::new();

/// Get the global V8 platform, initializing it if necessary.
///
/// Safe to call from multiple threads. The platform is never torn down.
pub fn get_platform() -> &'static v8::SharedRef<v8::Platform> {
    PLATFORM.get_or_init(|| {
        // Disable incremental marking - better for small heaps
        v8::V8::set_flags_from_string("--noincremental-marking");

        // On macOS, use single-threaded GC to avoid code collection issues
        // See: https://github.com/cloudflare/workers-sdk/issues/2386
        #[cfg(target_os = "macos")]
        v8::V8::set_flags_from_string("--single-threaded-gc");

        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform.clone());
        v8::V8::initialize();

        log::debug!("V8 platform initialized (v8 {})", v8::V8::get_version());

        platform
    })
}
