//! Wait requests returned by asynchronous script functions.
//!
//! An asynchronous function ends each step by returning one of the
//! values built here. Returning a wait request schedules the next
//! checkpoint; returning `done()` (or any other value) completes the
//! task.

use rhai::Engine;

/// A request to sleep and resume at a checkpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitRequest {
    pub seconds: f64,
    pub next_step: i64,
}

pub fn register(engine: &mut Engine) {
    engine.register_type_with_name::<WaitRequest>("WaitRequest");

    engine.register_fn("wait_seconds", |seconds: f64, next_step: i64| WaitRequest {
        seconds,
        next_step,
    });
    engine.register_fn("wait_seconds", |seconds: i64, next_step: i64| WaitRequest {
        seconds: seconds as f64,
        next_step,
    });
    engine.register_fn("wait_minutes", |minutes: f64, next_step: i64| WaitRequest {
        seconds: minutes * 60.0,
        next_step,
    });
    engine.register_fn("wait_minutes", |minutes: i64, next_step: i64| WaitRequest {
        seconds: minutes as f64 * 60.0,
        next_step,
    });
    engine.register_fn("wait_hours", |hours: f64, next_step: i64| WaitRequest {
        seconds: hours * 3600.0,
        next_step,
    });
    engine.register_fn("wait_hours", |hours: i64, next_step: i64| WaitRequest {
        seconds: hours as f64 * 3600.0,
        next_step,
    });

    // Completion marker: any non-WaitRequest return completes the task.
    engine.register_fn("done", || ());
}
