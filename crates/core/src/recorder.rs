//! Per-component metrics recording.

use crate::window::{LatencyWindow, DEFAULT_LATENCY_WINDOW};
use parking_lot::Mutex;
use std::time::Duration;
use sysdesign_types::{ComponentMetrics, Response};
use tokio::time::Instant;

/// Counters owned by a single component.
///
/// One short critical section per recorded request; snapshots copy out
/// under the same lock so readers never see a half-applied update.
#[derive(Debug)]
pub struct MetricsRecorder {
    inner: Mutex<RecorderState>,
}

#[derive(Debug)]
struct RecorderState {
    requests: u64,
    successes: u64,
    failures: u64,
    total_latency: Duration,
    bytes_transferred: u64,
    cache_hits: u64,
    cache_lookups: u64,
    window: LatencyWindow,
    /// Set on the first recorded request; throughput is measured from here.
    first_request: Option<Instant>,
}

impl RecorderState {
    fn new(window: usize) -> Self {
        Self {
            requests: 0,
            successes: 0,
            failures: 0,
            total_latency: Duration::ZERO,
            bytes_transferred: 0,
            cache_hits: 0,
            cache_lookups: 0,
            window: LatencyWindow::new(window),
            first_request: None,
        }
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_LATENCY_WINDOW)
    }

    /// Recorder keeping `window` recent samples for P95/P99.
    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Mutex::new(RecorderState::new(window)),
        }
    }

    /// Fold a finished response into the counters.
    pub fn record(&self, response: &Response) {
        self.record_outcome(response.is_success(), response.latency, response.data_size);
    }

    /// Record one request outcome.
    pub fn record_outcome(&self, success: bool, latency: Duration, bytes: u64) {
        let mut state = self.inner.lock();
        state.first_request.get_or_insert_with(Instant::now);
        state.requests += 1;
        if success {
            state.successes += 1;
            state.bytes_transferred += bytes;
        } else {
            state.failures += 1;
        }
        state.total_latency += latency;
        state.window.record(latency);
    }

    /// Record a cache lookup for hit-rate accounting.
    pub fn record_cache_lookup(&self, hit: bool) {
        let mut state = self.inner.lock();
        state.cache_lookups += 1;
        if hit {
            state.cache_hits += 1;
        }
    }

    pub fn snapshot(&self) -> ComponentMetrics {
        let state = self.inner.lock();
        let average_latency = if state.requests == 0 {
            Duration::ZERO
        } else {
            state.total_latency.div_f64(state.requests as f64)
        };
        let error_rate = if state.requests == 0 {
            0.0
        } else {
            state.failures as f64 / state.requests as f64
        };
        let cache_hit_rate = if state.cache_lookups == 0 {
            0.0
        } else {
            state.cache_hits as f64 / state.cache_lookups as f64
        };
        let throughput = state
            .first_request
            .map(|first| first.elapsed().as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .map(|secs| state.successes as f64 / secs)
            .unwrap_or(0.0);

        ComponentMetrics {
            requests: state.requests,
            successes: state.successes,
            failures: state.failures,
            total_latency: state.total_latency,
            average_latency,
            p95_latency: state.window.p95(),
            p99_latency: state.window.p99(),
            throughput,
            error_rate,
            cache_hit_rate,
            bytes_transferred: state.bytes_transferred,
        }
    }

    /// Clear every counter.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        let window = state.window.capacity();
        *state = RecorderState::new(window);
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_rates() {
        let recorder = MetricsRecorder::new();
        recorder.record_outcome(true, Duration::from_millis(10), 100);
        recorder.record_outcome(true, Duration::from_millis(20), 100);
        recorder.record_outcome(false, Duration::from_millis(30), 100);

        let m = recorder.snapshot();
        assert_eq!(m.requests, 3);
        assert_eq!(m.successes, 2);
        assert_eq!(m.failures, 1);
        assert_eq!(m.average_latency, Duration::from_millis(20));
        assert_eq!(m.bytes_transferred, 200);
        assert!((m.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.p99_latency, Duration::from_millis(30));
    }

    #[test]
    fn test_cache_hit_rate() {
        let recorder = MetricsRecorder::new();
        recorder.record_cache_lookup(true);
        recorder.record_cache_lookup(true);
        recorder.record_cache_lookup(true);
        recorder.record_cache_lookup(false);
        assert!((recorder.snapshot().cache_hit_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let recorder = MetricsRecorder::new();
        recorder.record_outcome(true, Duration::from_millis(1), 0);
        let mut m = recorder.snapshot();
        m.requests = 99;
        assert_eq!(recorder.snapshot().requests, 1);

        recorder.reset();
        assert_eq!(recorder.snapshot(), ComponentMetrics::default());
    }
}
