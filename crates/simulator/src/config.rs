//! Configuration types for workload runs.

use std::time::Duration;
use sysdesign_game::{RegionWeights, TrafficPattern};
use sysdesign_types::regions;

/// Default seed for reproducible runs.
pub const DEFAULT_SEED: u64 = 12345;

/// Workload shape for a run.
#[derive(Clone, Debug)]
pub struct WorkloadConfig {
    /// Baseline requests per second, before the daily curve.
    pub target_rps: u64,

    /// Time between request batches.
    pub batch_interval: Duration,

    /// Fraction of reads against the item key space.
    pub read_ratio: f64,

    /// Fraction of writes against the item key space.
    pub write_ratio: f64,

    /// Fraction of reads for static assets. What is left after reads,
    /// writes and static assets are API calls.
    pub static_ratio: f64,

    /// Payload size of writes in bytes.
    pub payload_size: u64,

    /// Number of distinct keys per request family. Smaller key spaces give
    /// hotter caches.
    pub key_space: u64,

    /// Number of distinct users requests are attributed to.
    pub users: u64,

    /// Where requests originate.
    pub regions: RegionWeights,

    /// Daily load curve applied to `target_rps`.
    pub pattern: TrafficPattern,

    /// Simulated hour of day the curve is sampled at.
    pub hour_of_day: u32,

    /// Random seed for request generation.
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            target_rps: 100,
            batch_interval: Duration::from_millis(50),
            read_ratio: 0.8,
            write_ratio: 0.2,
            static_ratio: 0.0,
            payload_size: 1024,
            key_space: 1_000,
            users: 500,
            regions: RegionWeights::new().with(regions::US_EAST, 1.0),
            pattern: TrafficPattern::steady(),
            hour_of_day: 12,
            seed: DEFAULT_SEED,
        }
    }
}

impl WorkloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the baseline request rate.
    pub fn with_target_rps(mut self, rps: u64) -> Self {
        self.target_rps = rps;
        self
    }

    /// Set the batch interval (minimum 1 ms).
    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the read and write fractions, clamped so they never exceed 1.0
    /// together. Any static share is dropped when it no longer fits.
    pub fn with_mix(mut self, read_ratio: f64, write_ratio: f64) -> Self {
        self.read_ratio = read_ratio.clamp(0.0, 1.0);
        self.write_ratio = write_ratio.clamp(0.0, 1.0 - self.read_ratio);
        self.static_ratio = self.static_ratio.min(self.unassigned());
        self
    }

    /// Set the static-asset fraction, clamped to what reads and writes leave.
    pub fn with_static_ratio(mut self, ratio: f64) -> Self {
        self.static_ratio = ratio.clamp(0.0, self.unassigned());
        self
    }

    pub fn with_payload_size(mut self, bytes: u64) -> Self {
        self.payload_size = bytes;
        self
    }

    pub fn with_key_space(mut self, keys: u64) -> Self {
        self.key_space = keys.max(1);
        self
    }

    pub fn with_users(mut self, users: u64) -> Self {
        self.users = users.max(1);
        self
    }

    pub fn with_regions(mut self, regions: RegionWeights) -> Self {
        self.regions = regions;
        self
    }

    /// Use a traffic pattern for the daily curve and the request mix.
    pub fn with_pattern(mut self, pattern: TrafficPattern) -> Self {
        let read = pattern.reads_percentage / 100.0;
        let write = pattern.writes_percentage / 100.0;
        let statics = pattern.static_percentage / 100.0;
        self.pattern = pattern;
        self.static_ratio = 0.0;
        self.with_mix(read, write).with_static_ratio(statics)
    }

    /// Set the simulated hour of day (wraps at 24).
    pub fn with_hour_of_day(mut self, hour: u32) -> Self {
        self.hour_of_day = hour % 24;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn unassigned(&self) -> f64 {
        (1.0 - self.read_ratio - self.write_ratio).max(0.0)
    }

    /// Fraction of API calls.
    pub fn api_ratio(&self) -> f64 {
        (1.0 - self.read_ratio - self.write_ratio - self.static_ratio).max(0.0)
    }

    /// Request rate after the daily curve.
    pub fn effective_rps(&self) -> u64 {
        self.pattern.rps_at(self.target_rps, self.hour_of_day)
    }

    /// Requests per batch to reach the effective rate.
    ///
    /// batch_size * (1s / batch_interval) = rps
    pub fn batch_size(&self) -> usize {
        let rps = self.effective_rps();
        if rps == 0 {
            return 0;
        }
        ((rps as f64 * self.batch_interval.as_secs_f64()).round() as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_tracks_rate() {
        let config = WorkloadConfig::new().with_target_rps(1000);
        assert_eq!(config.batch_size(), 50);

        let slow = WorkloadConfig::new()
            .with_target_rps(3)
            .with_batch_interval(Duration::from_millis(10));
        assert_eq!(slow.batch_size(), 1);
        assert_eq!(WorkloadConfig::new().with_target_rps(0).batch_size(), 0);
    }

    #[test]
    fn test_mix_clamped() {
        let config = WorkloadConfig::new().with_mix(0.7, 0.6);
        assert_eq!(config.read_ratio, 0.7);
        assert!((config.write_ratio - 0.3).abs() < 1e-9);
        assert!(config.api_ratio() < 1e-9);

        let config = WorkloadConfig::new().with_mix(0.5, 0.2).with_static_ratio(0.2);
        assert!((config.api_ratio() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_pattern_sets_mix_and_curve() {
        let config = WorkloadConfig::new()
            .with_target_rps(100)
            .with_pattern(TrafficPattern::business_hours(2.0).with_mix(50.0, 10.0, 40.0))
            .with_hour_of_day(34);
        assert_eq!(config.hour_of_day, 10);
        assert_eq!(config.effective_rps(), 200);
        assert_eq!(config.read_ratio, 0.5);
        assert_eq!(config.write_ratio, 0.1);
        assert!((config.static_ratio - 0.4).abs() < 1e-9);
    }
}
