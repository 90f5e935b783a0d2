//! Bounded window of recent latency samples.

use std::collections::VecDeque;
use std::time::Duration;

/// Default number of samples kept for percentile estimation.
pub const DEFAULT_LATENCY_WINDOW: usize = 1000;

/// Ring of the most recent latency samples.
///
/// Percentiles use the nearest-rank definition over a sorted copy: the
/// `p`-th percentile of `n` samples is the value at rank `ceil(n * p)`. With
/// samples 1..=100 ms, P99 is 99 ms.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    /// Create a window retaining at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest when full.
    pub fn record(&mut self, latency: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Nearest-rank percentile, `p` in `[0, 1]`. Zero when empty.
    pub fn percentile(&self, p: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        sorted[nearest_rank_index(sorted.len(), p)]
    }

    pub fn p95(&self) -> Duration {
        self.percentile(0.95)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(0.99)
    }

    /// Mean of the retained samples.
    pub fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

/// Zero-based index of the nearest-rank percentile in a sorted slice of
/// length `n > 0`.
pub fn nearest_rank_index(n: usize, p: f64) -> usize {
    let p = p.clamp(0.0, 1.0);
    let rank = (n as f64 * p).ceil() as usize;
    rank.saturating_sub(1).min(n - 1)
}
