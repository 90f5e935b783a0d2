//! Configuration for the simulation engine.

use std::time::Duration;
use sysdesign_core::DEFAULT_LATENCY_WINDOW;

/// Default interval between metrics refreshes.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Default bound of the inbound request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Configuration for a [`Simulator`](crate::Simulator).
#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    /// Interval of the tick loop. Also the step of the virtual display clock.
    pub tick_interval: Duration,

    /// Bound of the inbound request queue. Submitters wait when it is full.
    pub queue_capacity: usize,

    /// Number of recent latencies kept for P99 estimation.
    pub latency_window: usize,
}

impl SimulatorConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            latency_window: DEFAULT_LATENCY_WINDOW,
        }
    }

    /// Set the tick interval (minimum 1 ms).
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the request queue bound (minimum 1).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the recent-latency window size.
    pub fn with_latency_window(mut self, window: usize) -> Self {
        self.latency_window = window;
        self
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
