//! Drives a simulator with a synthetic workload at a target rate.

use crate::config::WorkloadConfig;
use crate::report::RunReport;
use crate::workload::{MixedWorkload, WorkloadGenerator};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use sysdesign_engine::{Simulator, SimulatorError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default limit on waiting for in-flight requests after submission ends.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Submits batches of generated requests to a [`Simulator`].
///
/// Batches go out every `batch_interval`, each sized so the batches add up
/// to the configured rate. Submission waits when the simulator's queue is
/// full, so an overloaded topology shows up as a lower achieved rate rather
/// than unbounded memory.
pub struct WorkloadRunner {
    simulator: Arc<Simulator>,
    workload: MixedWorkload,
    rng: ChaCha8Rng,
    drain_timeout: Duration,
    progress_interval: Duration,
}

impl WorkloadRunner {
    pub fn new(simulator: Arc<Simulator>, config: WorkloadConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            simulator,
            workload: MixedWorkload::new(config),
            rng,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn simulator(&self) -> &Arc<Simulator> {
        &self.simulator
    }

    pub fn config(&self) -> &WorkloadConfig {
        self.workload.config()
    }

    /// Run for a fixed duration, then drain.
    pub async fn run_for(&mut self, duration: Duration) -> Result<RunReport, SimulatorError> {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        // Spawn a task to cancel after duration
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            cancel_clone.cancel();
        });

        self.run_until_cancelled(cancel).await
    }

    /// Submit until `cancel` fires, wait for in-flight requests (bounded by
    /// the drain timeout), and report.
    ///
    /// Starts the simulator if it is stopped, and stops it again afterwards.
    /// A simulator that was already running is left running.
    pub async fn run_until_cancelled(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<RunReport, SimulatorError> {
        let started_here = match self.simulator.start() {
            Ok(()) => true,
            Err(SimulatorError::AlreadyRunning) => false,
            Err(e) => return Err(e),
        };

        let config = self.workload.config().clone();
        info!(
            target_rps = config.target_rps,
            effective_rps = config.effective_rps(),
            batch_size = config.batch_size(),
            batch_interval_ms = config.batch_interval.as_millis() as u64,
            seed = config.seed,
            "Starting workload"
        );

        let start = Instant::now();
        let submitted = self.submit_until_cancelled(&cancel, start).await;
        let submit_window = start.elapsed();

        let drain_start = Instant::now();
        if tokio::time::timeout(self.drain_timeout, self.simulator.wait_for_in_flight())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.simulator.in_flight(),
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "Drain timed out with requests still in flight"
            );
        }
        let drain = drain_start.elapsed();

        if started_here {
            self.simulator.stop().await;
        }
        let submitted = submitted?;

        self.simulator.refresh_metrics();
        let report = RunReport {
            seed: config.seed,
            target_rps: config.effective_rps(),
            duration: submit_window,
            drain,
            submitted,
            metrics: self.simulator.get_metrics(),
        };
        info!(
            submitted,
            completed = report.metrics.total_requests,
            uptime = report.metrics.uptime,
            "Workload finished"
        );
        Ok(report)
    }

    async fn submit_until_cancelled(
        &mut self,
        cancel: &CancellationToken,
        start: Instant,
    ) -> Result<u64, SimulatorError> {
        let batch_size = self.workload.config().batch_size();
        let mut ticker = tokio::time::interval(self.workload.config().batch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut submitted = 0u64;
        let mut last_progress = Instant::now();

        'run: loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'run,
                _ = ticker.tick() => {}
            }

            let batch = self.workload.generate_batch(batch_size, &mut self.rng);
            for request in batch {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'run,
                    result = self.simulator.submit_request(request) => result?,
                }
                submitted += 1;
            }

            if last_progress.elapsed() >= self.progress_interval {
                let metrics = self.simulator.get_metrics();
                info!(
                    elapsed_s = start.elapsed().as_secs(),
                    submitted,
                    completed = metrics.total_requests,
                    failed = metrics.failed_requests,
                    in_flight = metrics.in_flight,
                    "Progress"
                );
                last_progress = Instant::now();
            }
        }
        Ok(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyConfig;
    use sysdesign_core::{Component, Pacing};
    use sysdesign_test_helpers::GatedComponent;
    use tracing_test::traced_test;

    fn reference_simulator() -> Arc<Simulator> {
        let simulator = Arc::new(Simulator::default());
        TopologyConfig::reference()
            .build(Pacing::instant())
            .unwrap()
            .install(&simulator)
            .unwrap();
        simulator
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_for_hits_target_rate() {
        let simulator = reference_simulator();
        let config = WorkloadConfig::new().with_target_rps(100).with_key_space(20);
        let mut runner = WorkloadRunner::new(simulator.clone(), config);

        let report = runner.run_for(Duration::from_secs(1)).await.unwrap();

        assert!((100..=105).contains(&report.submitted), "submitted: {}", report.submitted);
        assert_eq!(report.metrics.total_requests, report.submitted);
        assert_eq!(report.metrics.failed_requests, 0);
        assert!(report.metrics.components["cache"].cache_hit_rate > 0.0);
        assert!(!simulator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_outcome() {
        let run = || async {
            let mut runner = WorkloadRunner::new(
                reference_simulator(),
                WorkloadConfig::new().with_target_rps(200).with_seed(9),
            );
            runner.run_for(Duration::from_millis(500)).await.unwrap()
        };
        let a = run().await;
        let b = run().await;
        assert_eq!(a.submitted, b.submitted);
        assert_eq!(a.metrics.total_requests, b.metrics.total_requests);
        assert_eq!(a.metrics.failed_requests, b.metrics.failed_requests);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_is_reported() {
        let gated = Arc::new(GatedComponent::new("stuck"));
        let simulator = Arc::new(Simulator::default());
        simulator.register_component(gated.clone()).unwrap();
        simulator.set_entry_point(gated.id()).unwrap();

        let mut runner = WorkloadRunner::new(simulator.clone(), WorkloadConfig::new().with_target_rps(20))
            .with_drain_timeout(Duration::from_secs(1));
        let report = runner.run_for(Duration::from_millis(200)).await.unwrap();

        assert!(report.submitted > 0);
        assert_eq!(report.metrics.total_requests, 0);
        assert!(logs_contain("Drain timed out"));

        gated.open();
        simulator.wait_for_in_flight().await;
        assert_eq!(simulator.get_metrics().total_requests, report.submitted);
    }

    #[tokio::test]
    async fn test_leaves_running_simulator_running() {
        let simulator = reference_simulator();
        simulator.start().unwrap();
        let mut runner = WorkloadRunner::new(
            simulator.clone(),
            WorkloadConfig::new().with_target_rps(100),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = runner.run_until_cancelled(cancel).await.unwrap();
        assert_eq!(report.submitted, 0);
        assert!(simulator.is_running());
        simulator.stop().await;
    }
}
