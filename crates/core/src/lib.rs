//! Component abstraction for the system design simulator.
//!
//! - [`Component`]: the polymorphic unit every simulated piece of
//!   infrastructure implements, tagged with a [`ComponentKind`]
//! - [`Downstream`]: non-owning handle used to wire components together
//! - [`Pacing`]: scaling hook for simulated processing delays
//! - [`MetricsRecorder`] and [`LatencyWindow`]: per-component counters and
//!   percentile estimation

mod downstream;
mod pacing;
mod recorder;
mod traits;
mod window;

pub use downstream::Downstream;
pub use pacing::Pacing;
pub use recorder::MetricsRecorder;
pub use traits::{Component, ComponentKind};
pub use window::{nearest_rank_index, LatencyWindow, DEFAULT_LATENCY_WINDOW};
