//! Thread-safe access to the chip state.

use std::sync::{Arc, RwLock};

use super::model::ChipState;

/// Shared handle to the central [`ChipState`].
///
/// Wraps the state in an `Arc<RwLock>`: many readers or one writer.
#[derive(Clone)]
pub struct ChipManager {
    state: Arc<RwLock<ChipState>>,
}

impl Default for ChipManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ChipState::new())),
        }
    }

    pub fn with_state(state: ChipState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Read the state with a closure.
    pub fn with_state_read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ChipState) -> R,
    {
        let state = self.state.read().expect("State lock poisoned");
        f(&state)
    }

    /// Write to the state with a closure.
    pub fn with_state_write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ChipState) -> R,
    {
        let mut state = self.state.write().expect("State lock poisoned");
        f(&mut state)
    }

    /// Clone of the current state, for snapshot rendering.
    pub fn snapshot(&self) -> ChipState {
        self.with_state_read(|s| s.clone())
    }

    pub fn version(&self) -> u64 {
        self.with_state_read(|s| s.version)
    }
}

impl std::fmt::Debug for ChipManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChipManager")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_shares_state() {
        let manager = ChipManager::new();
        let clone = manager.clone();
        clone.with_state_write(|s| {
            s.chip.add_valve("Inlet", 2);
            s.bump_version();
        });
        assert_eq!(
            manager.with_state_read(|s| s.chip.find_valve("Inlet").map(|v| v.solenoid_number)),
            Some(2)
        );
        assert_eq!(manager.version(), 1);
    }
}
