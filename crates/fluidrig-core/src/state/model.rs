//! The central state model.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compile::{CompiledProgram, Message, MessageKind};
use crate::scheduler::TaskView;
use crate::script::{Chip, ProgramId};

/// Everything an observer needs to render the application.
#[derive(Clone, Debug)]
pub struct ChipState {
    /// Monotonic change counter, bumped on every mutation. Observers
    /// poll it to decide whether to re-render.
    pub version: u64,
    pub chip: Chip,
    /// Memoized compile results, keyed by program.
    pub compiled: HashMap<ProgramId, Arc<CompiledProgram>>,
    /// Runtime messages per program: `log()` output and task errors.
    /// Compile diagnostics live on the compile result instead.
    pub program_messages: HashMap<ProgramId, Vec<Message>>,
    /// Live task listing, refreshed by the update thread.
    pub tasks: Vec<TaskView>,
}

impl Default for ChipState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipState {
    pub fn new() -> Self {
        Self {
            version: 0,
            chip: Chip::new(),
            compiled: HashMap::new(),
            program_messages: HashMap::new(),
            tasks: Vec::new(),
        }
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn push_message(&mut self, program: ProgramId, message: Message) {
        self.program_messages.entry(program).or_default().push(message);
        self.bump_version();
    }

    /// Clear a program's message area.
    ///
    /// Compile errors are kept visible: they live on the compile result
    /// and only go away when the script compiles cleanly again.
    pub fn clear_messages(&mut self, program: ProgramId) {
        self.program_messages.remove(&program);
        self.bump_version();
    }

    /// The full message area of a program: compile diagnostics first,
    /// then runtime messages in arrival order.
    pub fn messages_for(&self, program: ProgramId) -> Vec<Message> {
        let mut messages = self
            .compiled
            .get(&program)
            .map(|c| c.messages.clone())
            .unwrap_or_default();
        if let Some(runtime) = self.program_messages.get(&program) {
            messages.extend(runtime.iter().cloned());
        }
        messages
    }

    pub fn has_errors(&self, program: ProgramId) -> bool {
        self.messages_for(program)
            .iter()
            .any(|m| m.kind != MessageKind::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_retains_compile_errors() {
        let mut state = ChipState::new();
        let compiled = CompiledProgram {
            parameters: Vec::new(),
            functions: Vec::new(),
            messages: vec![Message::compile_error("bad declaration")],
            description: String::new(),
            fingerprint: 0,
            ast: None,
        };
        state.compiled.insert(1, Arc::new(compiled));
        state.push_message(1, Message::info("started"));
        state.push_message(1, Message::runtime_error("boom"));
        assert_eq!(state.messages_for(1).len(), 3);

        state.clear_messages(1);
        let remaining = state.messages_for(1);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, MessageKind::CompileError);
        assert!(state.has_errors(1));
    }

    #[test]
    fn test_version_bumps_on_messages() {
        let mut state = ChipState::new();
        let before = state.version;
        state.push_message(1, Message::info("hello"));
        assert!(state.version > before);
    }
}
