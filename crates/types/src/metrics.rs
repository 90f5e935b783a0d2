//! Per-component metrics snapshots.

use serde::Serialize;
use std::time::Duration;

/// Point-in-time copy of a component's counters.
///
/// Returned by value; mutating it never affects the component.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentMetrics {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency: Duration,
    pub average_latency: Duration,
    /// 95th percentile over the component's recent window.
    pub p95_latency: Duration,
    /// 99th percentile over the component's recent window.
    pub p99_latency: Duration,
    /// Successful requests per second since the first request.
    pub throughput: f64,
    pub error_rate: f64,
    /// Only meaningful for caching components; zero elsewhere.
    pub cache_hit_rate: f64,
    pub bytes_transferred: u64,
}

impl ComponentMetrics {
    /// Fraction of requests that succeeded, 1.0 when idle.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }
}
