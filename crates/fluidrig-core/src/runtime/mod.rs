//! The runtime: update thread, USB worker and the public handle.
//!
//! [`Runtime::start`] wires the whole system together and returns an
//! owner whose [`RuntimeHandle`] is the one entry point for callers:
//! task lifecycle requests, parameter edits, compile-on-demand and
//! watchdog queries. Dropping the runtime performs an orderly shutdown.

mod thread;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::api;
use crate::compile::{self, CompiledProgram, Message};
use crate::device::{serial_opener, LinkOpener};
use crate::params::ParameterValue;
use crate::rig::RigManager;
use crate::scheduler::{InFlight, Watchdog};
use crate::script::{fingerprint, ProgramId};
use crate::state::{ChipManager, ControlMessage};
use crate::usb_worker::UsbWorker;

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Cadence of the update thread's scheduling loop.
    pub tick_interval: Duration,
    /// How long one task step may run before the watchdog flags it.
    pub stuck_threshold: Duration,
    /// Port rescan cadence; `None` runs without hardware I/O entirely,
    /// for offline use such as script checking.
    pub rescan_interval: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(20),
            stuck_threshold: Duration::from_secs(5),
            rescan_interval: Some(Duration::from_secs(5)),
        }
    }
}

impl RuntimeConfig {
    /// Configuration for runs without any hardware access.
    pub fn offline() -> Self {
        Self {
            rescan_interval: None,
            ..Self::default()
        }
    }
}

/// Cloneable entry point into a running runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
    control_tx: Sender<ControlMessage>,
    state: ChipManager,
    rig: RigManager,
    watchdog: Watchdog,
}

impl RuntimeHandle {
    fn new(
        control_tx: Sender<ControlMessage>,
        state: ChipManager,
        rig: RigManager,
        watchdog: Watchdog,
    ) -> Self {
        Self {
            control_tx,
            state,
            rig,
            watchdog,
        }
    }

    pub fn state(&self) -> &ChipManager {
        &self.state
    }

    pub fn rig(&self) -> &RigManager {
        &self.rig
    }

    pub(crate) fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    fn send(&self, message: ControlMessage) {
        if self.control_tx.send(message).is_err() {
            log::warn!("Control channel closed; runtime is shutting down");
        }
    }

    pub fn start_function(&self, program: ProgramId, symbol: &str) {
        self.send(ControlMessage::StartFunction {
            program,
            symbol: symbol.to_string(),
        });
    }

    pub fn pause_function(&self, program: ProgramId, symbol: &str) {
        self.send(ControlMessage::PauseFunction {
            program,
            symbol: symbol.to_string(),
        });
    }

    pub fn resume_function(&self, program: ProgramId, symbol: &str) {
        self.send(ControlMessage::ResumeFunction {
            program,
            symbol: symbol.to_string(),
        });
    }

    pub fn stop_function(&self, program: ProgramId, symbol: &str) {
        self.send(ControlMessage::StopFunction {
            program,
            symbol: symbol.to_string(),
        });
    }

    pub fn stop_program(&self, program: ProgramId) {
        self.send(ControlMessage::StopProgram { program });
    }

    /// Store a parameter value after checking it against the declared
    /// kind. Returns false and changes nothing for an unknown symbol or
    /// an incompatible value.
    pub fn set_parameter_value(
        &self,
        program: ProgramId,
        symbol: &str,
        value: ParameterValue,
    ) -> bool {
        let Some(compiled) = self.compiled_program(program) else {
            return false;
        };
        let accepted = compiled
            .parameters
            .iter()
            .any(|d| d.symbol == symbol && d.kind.accepts(&value));
        if !accepted {
            return false;
        }
        self.state.with_state_write(|state| {
            if let Some(p) = state.chip.program_mut(program) {
                p.parameter_values.insert(symbol.to_string(), value);
            }
            state.bump_version();
        });
        true
    }

    pub fn set_parameter_visibility(&self, program: ProgramId, symbol: &str, visible: bool) {
        self.state.with_state_write(|state| {
            if let Some(p) = state.chip.program_mut(program) {
                p.parameter_visibility.insert(symbol.to_string(), visible);
            }
            state.bump_version();
        });
    }

    /// The compile result for a program, recompiling only when the
    /// script content changed since the cached result.
    ///
    /// Backfills the program's stored values against the declarations
    /// on every fresh compile. Returns `None` for an unknown program.
    pub fn compiled_program(&self, program: ProgramId) -> Option<Arc<CompiledProgram>> {
        let script = self
            .state
            .with_state_read(|state| state.chip.program(program).map(|p| p.script.clone()))?;
        let compiled = match script.read() {
            Ok(source) => {
                let current = fingerprint(&source);
                let cached = self.state.with_state_read(|state| {
                    state
                        .compiled
                        .get(&program)
                        .filter(|c| c.fingerprint == current)
                        .cloned()
                });
                if let Some(cached) = cached {
                    return Some(cached);
                }
                api::init_api(self.clone());
                api::context::set_current_program(Some(program));
                let compiled = compile::compile(&source);
                api::context::set_current_program(None);
                compiled
            }
            Err(err) => CompiledProgram {
                parameters: Vec::new(),
                functions: Vec::new(),
                messages: vec![Message::compile_error(format!(
                    "Could not read script: {}",
                    err
                ))],
                description: String::new(),
                fingerprint: 0,
                ast: None,
            },
        };
        let compiled = Arc::new(compiled);
        self.state.with_state_write(|state| {
            if let Some(p) = state.chip.program_mut(program) {
                compile::backfill(&compiled, p);
            }
            state.compiled.insert(program, Arc::clone(&compiled));
            state.bump_version();
        });
        Some(compiled)
    }

    /// The full message area of a program.
    pub fn program_messages(&self, program: ProgramId) -> Vec<Message> {
        self.state
            .with_state_read(|state| state.messages_for(program))
    }

    /// Clear a program's runtime messages; compile errors stay.
    pub fn clear_messages(&self, program: ProgramId) {
        self.state
            .with_state_write(|state| state.clear_messages(program));
    }

    /// Whether the current task step has exceeded the stuck threshold.
    pub fn is_stuck(&self) -> bool {
        self.watchdog.is_stuck(Instant::now())
    }

    /// The function to blame when [`Self::is_stuck`] reports true.
    pub fn suspected_function(&self) -> Option<InFlight> {
        self.watchdog.suspect(Instant::now())
    }
}

/// Owner of the runtime threads.
pub struct Runtime {
    handle: RuntimeHandle,
    shutdown: Arc<AtomicBool>,
    update_thread: Option<JoinHandle<()>>,
    usb_worker: Option<UsbWorker>,
}

impl Runtime {
    /// Start with real serial hardware access.
    pub fn start(config: RuntimeConfig) -> Self {
        Self::start_with_opener(config, serial_opener())
    }

    pub fn start_default() -> Self {
        Self::start(RuntimeConfig::default())
    }

    /// Start with an injected port opener, for tests and simulations.
    pub fn start_with_opener(config: RuntimeConfig, opener: LinkOpener) -> Self {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let state = ChipManager::new();
        let rig = RigManager::new(opener);
        let watchdog = Watchdog::new(config.stuck_threshold);
        let handle = RuntimeHandle::new(control_tx, state, rig.clone(), watchdog);

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_handle = handle.clone();
        let thread_shutdown = Arc::clone(&shutdown);
        let thread_config = config.clone();
        let update_thread = std::thread::Builder::new()
            .name("update-thread".to_string())
            .spawn(move || thread::run(thread_handle, control_rx, thread_shutdown, thread_config))
            .ok();
        if update_thread.is_none() {
            log::error!("Could not spawn update thread");
        }

        let usb_worker = config
            .rescan_interval
            .map(|interval| UsbWorker::spawn(rig, interval));

        Self {
            handle,
            shutdown,
            update_thread,
            usb_worker,
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Stop all tasks, join the update thread, then stop hardware I/O.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.update_thread.take() {
            if thread.join().is_err() {
                log::error!("Update thread panicked");
            }
        }
        if let Some(mut worker) = self.usb_worker.take() {
            worker.shutdown();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
