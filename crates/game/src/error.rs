//! Error types for level and session management.

use sysdesign_engine::SimulatorError;
use thiserror::Error;

/// Errors returned by [`Campaign`](crate::Campaign) and
/// [`GameSession`](crate::GameSession).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("Level {0} is not unlocked")]
    LevelLocked(u32),

    #[error("Level not found: {0}")]
    LevelNotFound(u32),

    /// No level attempt is in progress.
    #[error("No level is running")]
    NotRunning,

    #[error(transparent)]
    Simulator(#[from] SimulatorError),
}
