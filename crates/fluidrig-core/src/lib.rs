//! fluidrig core - control core for solenoid valve rigs.
//!
//! This crate provides the building blocks for driving microfluidic
//! chips through serial solenoid controller boards:
//!
//! - **Codec** - The write-only solenoid wire protocol
//! - **Device / Rig** - Controller boards and the global output space
//! - **USB worker** - Background port rescans and state flushes
//! - **Chip model** - Valves, scripts, programs and parameters
//! - **Compiler** - rhai script compilation and diagnostics
//! - **Scheduler** - Cooperative resumable tasks with a watchdog
//! - **Runtime** - The update thread and the public handle
//! - **API** - The rhai script API
//!
//! # Architecture
//!
//! Callers talk to a running [`Runtime`] through its [`RuntimeHandle`]:
//! task lifecycle requests travel over a control channel to the update
//! thread, where all script code runs; hardware traffic is confined to
//! the USB worker thread; shared state sits behind the [`ChipManager`]
//! and the rig mutex.

pub mod api;
pub mod builtins;
pub mod codec;
pub mod compile;
pub mod device;
pub mod error;
pub mod params;
pub mod rig;
pub mod runtime;
pub mod scheduler;
pub mod script;
pub mod state;
pub mod usb_worker;

pub use compile::{compile, CompiledProgram, FunctionDescriptor, Message, MessageKind};
pub use device::{scan_ports, Device, PortSummary};
pub use error::HardwareError;
pub use params::{ParameterDeclaration, ParameterKind, ParameterValue};
pub use rig::{Rig, RigManager};
pub use runtime::{Runtime, RuntimeConfig, RuntimeHandle};
pub use scheduler::{FunctionScheduler, StepOutcome, TaskPhase, TaskView, Watchdog};
pub use script::{Chip, Program, ProgramId, Script, Valve};
pub use state::{ChipManager, ChipState, ControlMessage};

pub use api::{create_engine, get_handle, init_api, register_api, require_handle};
