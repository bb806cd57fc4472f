//! The update thread: control handling and task stepping.
//!
//! One loop iteration drains pending control messages, steps at most
//! one ready task, publishes the task listing and sleeps for a tick.
//! All script code — task bodies, synchronous functions and lifecycle
//! callbacks — runs here, so scripts never race each other.
//!
//! Each task pins the compile result it started with. Recompiling a
//! script (even into a broken state) never disturbs a task that is
//! already running; it only affects new invocations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope};

use super::{RuntimeConfig, RuntimeHandle};
use crate::api::{self, context, wait::WaitRequest};
use crate::compile::{CompiledProgram, Message};
use crate::scheduler::{FunctionScheduler, StepOutcome};
use crate::script::ProgramId;
use crate::state::ControlMessage;

/// Compile results pinned by active tasks.
type PinnedPrograms = HashMap<(ProgramId, String), Arc<CompiledProgram>>;

pub(super) fn run(
    handle: RuntimeHandle,
    control_rx: Receiver<ControlMessage>,
    shutdown: Arc<AtomicBool>,
    config: RuntimeConfig,
) {
    api::init_api(handle.clone());
    let engine = api::create_engine();
    let mut scheduler = FunctionScheduler::new();
    let mut pinned = PinnedPrograms::new();
    log::debug!("Update thread started");

    while !shutdown.load(Ordering::SeqCst) {
        while let Ok(message) = control_rx.try_recv() {
            handle_control(&engine, &handle, &mut scheduler, &mut pinned, message);
        }
        step_one(&engine, &handle, &mut scheduler, &mut pinned);
        publish(&handle, &scheduler);
        std::thread::sleep(config.tick_interval);
    }

    // Orderly stop: every active task gets its stop callback.
    let programs: Vec<ProgramId> = handle
        .state()
        .with_state_read(|state| state.chip.programs.iter().map(|p| p.id).collect());
    for program in programs {
        stop_program(&engine, &handle, &mut scheduler, &mut pinned, program);
    }
    publish(&handle, &scheduler);
    log::debug!("Update thread stopped");
}

fn program_name(handle: &RuntimeHandle, program: ProgramId) -> String {
    handle
        .state()
        .with_state_read(|state| state.chip.program(program).map(|p| p.name.clone()))
        .unwrap_or_else(|| format!("program {}", program))
}

/// Call one script function on a compiled program's AST.
///
/// The AST's top level is not re-evaluated; it already ran once at
/// compile time and may touch hardware.
fn call_function(
    engine: &Engine,
    program: ProgramId,
    compiled: &CompiledProgram,
    symbol: &str,
    checkpoint: Option<i64>,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let Some(ast) = compiled.ast.as_ref() else {
        return Err("script does not compile".into());
    };
    let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
    let mut scope = Scope::new();
    context::set_current_program(Some(program));
    let result = match checkpoint {
        Some(step) => engine.call_fn_with_options(options, &mut scope, ast, symbol, (step,)),
        None => engine.call_fn_with_options(options, &mut scope, ast, symbol, ()),
    };
    context::set_current_program(None);
    result
}

fn report_error(
    handle: &RuntimeHandle,
    program: ProgramId,
    symbol: &str,
    err: impl std::fmt::Display,
) {
    log::warn!("Function '{}' failed: {}", symbol, err);
    handle.state().with_state_write(|state| {
        state.push_message(
            program,
            Message::runtime_error(format!("{} failed: {}", symbol, err)),
        );
    });
}

/// Run a task's lifecycle callback, if one is attached, against the
/// task's pinned compile result.
fn fire_callback(
    engine: &Engine,
    handle: &RuntimeHandle,
    program: ProgramId,
    compiled: &CompiledProgram,
    callback: Option<&str>,
) {
    let Some(callback) = callback else {
        return;
    };
    if let Err(err) = call_function(engine, program, compiled, callback, None) {
        report_error(handle, program, callback, err);
    }
}

fn handle_control(
    engine: &Engine,
    handle: &RuntimeHandle,
    scheduler: &mut FunctionScheduler,
    pinned: &mut PinnedPrograms,
    message: ControlMessage,
) {
    let now = Instant::now();
    match message {
        ControlMessage::StartFunction { program, symbol } => {
            let Some(compiled) = handle.compiled_program(program) else {
                log::warn!("Start request for unknown program {}", program);
                return;
            };
            let Some(descriptor) = compiled.function(&symbol) else {
                report_error(handle, program, &symbol, "no such function");
                return;
            };
            if descriptor.is_async {
                if scheduler.start(program, &symbol) {
                    log::info!("Started '{}'", symbol);
                    pinned.insert((program, symbol), compiled);
                } else {
                    log::debug!("'{}' is already running", symbol);
                }
            } else {
                // Synchronous functions run to completion right here.
                handle
                    .watchdog()
                    .begin(program, &program_name(handle, program), &symbol, now);
                let result = call_function(engine, program, &compiled, &symbol, None);
                handle.watchdog().clear();
                if let Err(err) = result {
                    report_error(handle, program, &symbol, err);
                }
            }
        }
        ControlMessage::PauseFunction { program, symbol } => {
            if scheduler.pause(program, &symbol, now) {
                log::info!("Paused '{}'", symbol);
                run_lifecycle(engine, handle, pinned, program, &symbol, |d| {
                    d.on_pause.as_deref()
                });
            }
        }
        ControlMessage::ResumeFunction { program, symbol } => {
            if scheduler.resume(program, &symbol, now) {
                log::info!("Resumed '{}'", symbol);
                run_lifecycle(engine, handle, pinned, program, &symbol, |d| {
                    d.on_resume.as_deref()
                });
            }
        }
        ControlMessage::StopFunction { program, symbol } => {
            if scheduler.stop(program, &symbol) {
                log::info!("Stopped '{}'", symbol);
                run_lifecycle(engine, handle, pinned, program, &symbol, |d| {
                    d.on_stop.as_deref()
                });
                pinned.remove(&(program, symbol));
            }
        }
        ControlMessage::StopProgram { program } => {
            stop_program(engine, handle, scheduler, pinned, program);
        }
    }
}

/// Fire one lifecycle callback of a pinned task.
fn run_lifecycle<'a>(
    engine: &Engine,
    handle: &RuntimeHandle,
    pinned: &'a PinnedPrograms,
    program: ProgramId,
    symbol: &str,
    pick: impl Fn(&'a crate::compile::FunctionDescriptor) -> Option<&'a str>,
) {
    let Some(compiled) = pinned.get(&(program, symbol.to_string())) else {
        return;
    };
    let callback = compiled.function(symbol).and_then(pick);
    fire_callback(engine, handle, program, compiled, callback);
}

fn stop_program(
    engine: &Engine,
    handle: &RuntimeHandle,
    scheduler: &mut FunctionScheduler,
    pinned: &mut PinnedPrograms,
    program: ProgramId,
) {
    for symbol in scheduler.stop_program(program) {
        log::info!("Stopped '{}'", symbol);
        run_lifecycle(engine, handle, pinned, program, &symbol, |d| {
            d.on_stop.as_deref()
        });
        pinned.remove(&(program, symbol));
    }
}

/// Step the next ready task, if any.
fn step_one(
    engine: &Engine,
    handle: &RuntimeHandle,
    scheduler: &mut FunctionScheduler,
    pinned: &mut PinnedPrograms,
) {
    let Some(ready) = scheduler.next_ready(Instant::now()) else {
        return;
    };
    let key = (ready.program, ready.symbol.clone());
    let Some(compiled) = pinned.get(&key).cloned() else {
        // A task without a pin has lost its program; drop it quietly.
        scheduler.stop(ready.program, &ready.symbol);
        return;
    };

    handle.watchdog().begin(
        ready.program,
        &program_name(handle, ready.program),
        &ready.symbol,
        Instant::now(),
    );
    let result = call_function(
        engine,
        ready.program,
        &compiled,
        &ready.symbol,
        Some(ready.checkpoint),
    );
    handle.watchdog().clear();

    let now = Instant::now();
    match result {
        Ok(value) => {
            let outcome = match value.try_cast::<WaitRequest>() {
                Some(wait) => StepOutcome::Wait {
                    seconds: wait.seconds,
                    next_step: wait.next_step,
                },
                None => StepOutcome::Done,
            };
            let finished = outcome == StepOutcome::Done;
            scheduler.record_outcome(ready.program, &ready.symbol, outcome, now);
            if finished {
                pinned.remove(&key);
            }
        }
        Err(err) => {
            // A failed step ends the task; the error lands in the
            // program's message area, not on the floor.
            report_error(handle, ready.program, &ready.symbol, err);
            scheduler.record_outcome(ready.program, &ready.symbol, StepOutcome::Done, now);
            pinned.remove(&key);
        }
    }
}

fn publish(handle: &RuntimeHandle, scheduler: &FunctionScheduler) {
    let views = scheduler.snapshot(Instant::now());
    handle.state().with_state_write(|state| {
        if state.tasks != views {
            state.tasks = views;
            state.bump_version();
        }
    });
}
