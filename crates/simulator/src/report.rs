//! Summary of a workload run.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use sysdesign_engine::AggregateMetrics;

/// Outcome of one [`WorkloadRunner`](crate::WorkloadRunner) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub seed: u64,
    /// Rate the generator aimed for, after the daily multiplier.
    pub target_rps: u64,
    /// Length of the submission window.
    pub duration: Duration,
    /// Time spent waiting for in-flight requests afterwards.
    pub drain: Duration,
    pub submitted: u64,
    pub metrics: AggregateMetrics,
}

impl RunReport {
    /// Submitted requests per second over the submission window.
    pub fn achieved_rps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.submitted as f64 / secs
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn rounded(duration: Duration) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_millis(duration.as_millis() as u64))
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.metrics;
        writeln!(f, "--- Run Report ---")?;
        writeln!(f, "Seed:        {}", self.seed)?;
        writeln!(f, "Duration:    {} (drain {})", rounded(self.duration), rounded(self.drain))?;
        writeln!(
            f,
            "Submitted:   {} ({:.1} rps, target {})",
            self.submitted,
            self.achieved_rps(),
            self.target_rps
        )?;
        writeln!(
            f,
            "Completed:   {} ({} ok, {} failed)",
            m.total_requests, m.successful_requests, m.failed_requests
        )?;
        writeln!(f, "Uptime:      {:.2}%", m.uptime * 100.0)?;
        writeln!(f, "Error rate:  {:.2}%", m.error_rate * 100.0)?;
        writeln!(f, "Avg:         {:?}", m.average_latency)?;
        writeln!(f, "P50:         {:?}", m.lifetime.p50)?;
        writeln!(f, "P95:         {:?}", m.lifetime.p95)?;
        writeln!(f, "P99:         {:?}", m.lifetime.p99)?;
        writeln!(f, "Max:         {:?}", m.lifetime.max)?;
        writeln!(f, "Cost:        ${:.2}/hour", m.total_cost)?;

        if !m.components.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{:<16} {:>10} {:>8} {:>12} {:>12} {:>8}",
                "component", "requests", "errors", "avg", "p99", "hit"
            )?;
            for (id, c) in &m.components {
                writeln!(
                    f,
                    "{:<16} {:>10} {:>7.2}% {:>12} {:>12} {:>7.1}%",
                    id.as_str(),
                    c.requests,
                    c.error_rate * 100.0,
                    format!("{:?}", c.average_latency),
                    format!("{:?}", c.p99_latency),
                    c.cache_hit_rate * 100.0
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysdesign_types::ComponentMetrics;

    fn report() -> RunReport {
        let mut metrics = AggregateMetrics {
            total_requests: 200,
            successful_requests: 190,
            failed_requests: 10,
            uptime: 0.95,
            error_rate: 0.05,
            total_cost: 12.5,
            ..Default::default()
        };
        metrics.components.insert(
            "cache".into(),
            ComponentMetrics {
                requests: 150,
                cache_hit_rate: 0.8,
                ..Default::default()
            },
        );
        RunReport {
            seed: 7,
            target_rps: 100,
            duration: Duration::from_secs(2),
            drain: Duration::from_millis(30),
            submitted: 200,
            metrics,
        }
    }

    #[test]
    fn test_achieved_rps() {
        assert_eq!(report().achieved_rps(), 100.0);
        let empty = RunReport {
            duration: Duration::ZERO,
            ..report()
        };
        assert_eq!(empty.achieved_rps(), 0.0);
    }

    #[test]
    fn test_text_report() {
        let text = report().to_string();
        assert!(text.contains("Seed:        7"));
        assert!(text.contains("Duration:    2s (drain 30ms)"));
        assert!(text.contains("Uptime:      95.00%"));
        assert!(text.contains("Cost:        $12.50/hour"));
        assert!(text.contains("cache"));
        assert!(text.contains("80.0%"));
    }

    #[test]
    fn test_json_report() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();
        assert_eq!(json["submitted"], 200);
        assert_eq!(json["metrics"]["failed_requests"], 10);
        assert_eq!(json["metrics"]["components"]["cache"]["requests"], 150);
    }
}
