//! Error types for the simulator API.

use sysdesign_types::ComponentId;
use thiserror::Error;

/// Errors returned by [`Simulator`](crate::Simulator) operations.
///
/// Request-level failures never show up here: they are carried on
/// responses and counted in the aggregate metrics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulatorError {
    /// A component with this id is already registered.
    #[error("Component already registered: {0}")]
    DuplicateComponent(ComponentId),

    /// No component with this id is registered.
    #[error("Component not found: {0}")]
    ComponentNotFound(ComponentId),

    /// The simulator is stopped; the request was not enqueued.
    #[error("Simulator is not running")]
    NotRunning,

    /// `start` called on a running simulator.
    #[error("Simulator is already running")]
    AlreadyRunning,

    /// The request queue is at capacity.
    #[error("Request queue is full")]
    QueueFull,
}
