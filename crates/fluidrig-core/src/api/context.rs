//! Per-thread execution context.
//!
//! API functions need to know which program owns the code that is
//! currently running, so `param()` and `log()` resolve against the
//! right program. The update thread (and the compiler) set the current
//! program before entering script code and clear it after.

use std::cell::Cell;

use crate::script::ProgramId;

thread_local! {
    static CURRENT_PROGRAM: Cell<Option<ProgramId>> = const { Cell::new(None) };
}

pub fn set_current_program(program: Option<ProgramId>) {
    CURRENT_PROGRAM.with(|c| c.set(program));
}

pub fn current_program() -> Option<ProgramId> {
    CURRENT_PROGRAM.with(|c| c.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_round_trip() {
        set_current_program(Some(7));
        assert_eq!(current_program(), Some(7));
        set_current_program(None);
        assert_eq!(current_program(), None);
    }
}
