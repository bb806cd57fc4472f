//! Control requests processed by the update thread.

use crate::script::ProgramId;

/// A task lifecycle request.
///
/// Sent from any thread over the control channel; the update thread
/// drains the channel at the start of every tick, so lifecycle
/// callbacks always run on the update thread alongside the task bodies
/// they belong to.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlMessage {
    StartFunction { program: ProgramId, symbol: String },
    PauseFunction { program: ProgramId, symbol: String },
    ResumeFunction { program: ProgramId, symbol: String },
    StopFunction { program: ProgramId, symbol: String },
    /// Stop every running function of one program.
    StopProgram { program: ProgramId },
}
