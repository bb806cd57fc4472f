//! Script API bindings.
//!
//! Every function exposed to scripts reaches the runtime through a
//! thread-local [`RuntimeHandle`]: call [`init_api`] on a thread before
//! executing any script code there. The update thread does this once
//! at startup; compiles do it on whichever thread they run.

pub mod context;
pub mod global;
pub mod valve;
pub mod wait;

use std::cell::RefCell;

use rhai::Engine;

use crate::runtime::RuntimeHandle;

thread_local! {
    static RUNTIME_HANDLE: RefCell<Option<RuntimeHandle>> = const { RefCell::new(None) };
}

/// Install the runtime handle for the current thread.
pub fn init_api(handle: RuntimeHandle) {
    RUNTIME_HANDLE.with(|h| {
        *h.borrow_mut() = Some(handle);
    });
}

/// The current thread's runtime handle, if installed.
pub fn get_handle() -> Option<RuntimeHandle> {
    RUNTIME_HANDLE.with(|h| h.borrow().clone())
}

/// The current thread's runtime handle.
///
/// Panics when [`init_api`] has not been called on this thread; that is
/// a wiring bug, not a script error.
pub fn require_handle() -> RuntimeHandle {
    get_handle().expect("Script API not initialized. Call init_api() first.")
}

/// Register the whole script API on an engine.
pub fn register_api(engine: &mut Engine) {
    global::register(engine);
    valve::register(engine);
    wait::register(engine);
}

/// Create an engine with the script API registered.
///
/// `print` and `debug` are routed into the log so script output lands
/// next to the runtime's own records.
pub fn create_engine() -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(256, 256);
    engine.set_max_call_levels(256);

    engine.on_print(|text| {
        log::info!("[script] {}", text);
    });
    engine.on_debug(|text, source, pos| {
        let loc = match (source, pos) {
            (Some(src), pos) if !pos.is_none() => format!(" ({}:{})", src, pos),
            (Some(src), _) => format!(" ({})", src),
            (None, pos) if !pos.is_none() => format!(" ({})", pos),
            _ => String::new(),
        };
        log::debug!("[script]{} {}", loc, text);
    });

    register_api(&mut engine);

    engine
}
