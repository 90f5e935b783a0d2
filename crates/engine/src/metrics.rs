//! Aggregate metrics across every dispatched request.

use hdrhistogram::Histogram;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use sysdesign_core::LatencyWindow;
use sysdesign_types::{ComponentId, ComponentMetrics, Response};

/// Lifetime latency distribution from the histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

/// Snapshot of the simulator's aggregate state.
///
/// Totals are updated as each request completes; the per-component map and
/// the cost are refreshed on every tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_latency: Duration,
    pub average_latency: Duration,
    /// Nearest-rank P99 over the recent-latency window.
    pub p99_latency: Duration,
    /// Distribution over every request since the last reset.
    pub lifetime: LatencySummary,
    /// Fraction of requests that succeeded, 1.0 when idle.
    pub uptime: f64,
    pub error_rate: f64,
    /// Requests submitted but not yet completed.
    pub in_flight: usize,
    /// Sum of the registered components' hourly cost at the last tick.
    pub total_cost: f64,
    pub components: IndexMap<ComponentId, ComponentMetrics>,
}

#[derive(Debug)]
struct AggregateState {
    total: u64,
    successes: u64,
    failures: u64,
    total_latency: Duration,
    window: LatencyWindow,
    /// Latencies in microseconds.
    histogram: Histogram<u64>,
    components: IndexMap<ComponentId, ComponentMetrics>,
    total_cost: f64,
}

impl AggregateState {
    fn new(window: usize) -> Self {
        Self {
            total: 0,
            successes: 0,
            failures: 0,
            total_latency: Duration::ZERO,
            window: LatencyWindow::new(window),
            histogram: Histogram::new(3).expect("3 significant figures is a valid histogram precision"),
            components: IndexMap::new(),
            total_cost: 0.0,
        }
    }
}

/// Lock-guarded aggregate counters shared by dispatch tasks, the tick loop
/// and readers.
#[derive(Debug)]
pub(crate) struct AggregateRecorder {
    state: Mutex<AggregateState>,
}

impl AggregateRecorder {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            state: Mutex::new(AggregateState::new(window)),
        }
    }

    /// Fold one completed request. Both `success` and `error` are checked.
    pub(crate) fn record(&self, response: &Response) {
        let micros = u64::try_from(response.latency.as_micros()).unwrap_or(u64::MAX);
        let mut state = self.state.lock();
        state.total += 1;
        if response.is_success() {
            state.successes += 1;
        } else {
            state.failures += 1;
        }
        state.total_latency += response.latency;
        state.window.record(response.latency);
        state.histogram.saturating_record(micros);
    }

    pub(crate) fn update_components(
        &self,
        components: IndexMap<ComponentId, ComponentMetrics>,
        total_cost: f64,
    ) {
        let mut state = self.state.lock();
        state.components = components;
        state.total_cost = total_cost;
    }

    pub(crate) fn p99(&self) -> Duration {
        self.state.lock().window.p99()
    }

    pub(crate) fn reset(&self) {
        let mut state = self.state.lock();
        let window = state.window.capacity();
        *state = AggregateState::new(window);
    }

    pub(crate) fn snapshot(&self, in_flight: usize) -> AggregateMetrics {
        let state = self.state.lock();
        let (uptime, error_rate, average_latency) = if state.total == 0 {
            (1.0, 0.0, Duration::ZERO)
        } else {
            (
                state.successes as f64 / state.total as f64,
                state.failures as f64 / state.total as f64,
                state.total_latency.div_f64(state.total as f64),
            )
        };
        let hist = &state.histogram;
        let lifetime = if hist.is_empty() {
            LatencySummary::default()
        } else {
            LatencySummary {
                samples: hist.len(),
                p50: Duration::from_micros(hist.value_at_quantile(0.50)),
                p95: Duration::from_micros(hist.value_at_quantile(0.95)),
                p99: Duration::from_micros(hist.value_at_quantile(0.99)),
                max: Duration::from_micros(hist.max()),
            }
        };

        AggregateMetrics {
            total_requests: state.total,
            successful_requests: state.successes,
            failed_requests: state.failures,
            total_latency: state.total_latency,
            average_latency,
            p99_latency: state.window.p99(),
            lifetime,
            uptime,
            error_rate,
            in_flight,
            total_cost: state.total_cost,
            components: state.components.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysdesign_types::{ComponentError, RequestId};

    fn ok(ms: u64) -> Response {
        Response::success(RequestId(1), "api", Duration::from_millis(ms), 0)
    }

    #[test]
    fn test_window_p99_pinned() {
        let recorder = AggregateRecorder::new(1000);
        for ms in 1..=100 {
            recorder.record(&ok(ms));
        }
        assert_eq!(recorder.p99(), Duration::from_millis(99));

        let snapshot = recorder.snapshot(0);
        assert_eq!(snapshot.p99_latency, Duration::from_millis(99));
        assert_eq!(snapshot.lifetime.samples, 100);
        assert_eq!(snapshot.lifetime.max.as_millis(), 100);
    }

    #[test]
    fn test_failures_counted_from_either_field() {
        let recorder = AggregateRecorder::new(10);
        recorder.record(&ok(1));
        recorder.record(&Response::rejected(RequestId(2), ComponentError::NoEntryPoint));
        let mut inconsistent = ok(1);
        inconsistent.error = Some(ComponentError::NoEntryPoint);
        recorder.record(&inconsistent);

        let snapshot = recorder.snapshot(0);
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 2);
        assert!((snapshot.uptime - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_and_reset() {
        let recorder = AggregateRecorder::new(10);
        assert_eq!(recorder.snapshot(0).uptime, 1.0);
        recorder.record(&ok(5));
        recorder.reset();
        let snapshot = recorder.snapshot(0);
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.p99_latency, Duration::ZERO);
        assert_eq!(snapshot.lifetime, LatencySummary::default());
    }
}
