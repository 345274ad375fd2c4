use serde::{Deserialize, Serialize};

/// Recorder lifecycle state.
///
/// Idle is both initial and terminal; start moves to Recording, toggle_pause
/// flips Recording and Paused, stop returns to Idle from either active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderState {
    Idle,
    Recording,
    Paused,
}

impl RecorderState {
    pub fn is_active(&self) -> bool {
        !matches!(self, RecorderState::Idle)
    }
}
