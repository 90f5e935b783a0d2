//! Latency scaling for simulated processing delays.
//!
//! Components model processing time with real sleeps. [`Pacing`] lets a run
//! compress or stretch every modeled delay uniformly without touching the
//! components' latency models: the modeled value is what a component reports
//! as its intent, the paced value is what it actually waits.

use std::time::Duration;

/// Multiplier applied to every simulated delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    scale: f64,
}

impl Pacing {
    /// Sleep exactly the modeled latency.
    pub fn real_time() -> Self {
        Self { scale: 1.0 }
    }

    /// Multiply every modeled delay by `scale`. Negative or non-finite
    /// values are treated as zero.
    pub fn scaled(scale: f64) -> Self {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            0.0
        };
        Self { scale }
    }

    /// Never sleep; only yield to the scheduler.
    pub fn instant() -> Self {
        Self::scaled(0.0)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Delay actually waited for a modeled latency.
    pub fn apply(&self, modeled: Duration) -> Duration {
        if self.scale == 1.0 {
            modeled
        } else {
            modeled.mul_f64(self.scale)
        }
    }

    /// Wait out a modeled delay.
    pub async fn pause(&self, modeled: Duration) {
        let delay = self.apply(modeled);
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::real_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_apply_scales() {
        let ms = Duration::from_millis(10);
        assert_eq!(Pacing::real_time().apply(ms), ms);
        assert_eq!(Pacing::scaled(0.5).apply(ms), Duration::from_millis(5));
        assert_eq!(Pacing::instant().apply(ms), Duration::ZERO);
        assert_eq!(Pacing::scaled(f64::NAN).scale(), 0.0);
        assert_eq!(Pacing::scaled(-3.0).scale(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_uses_tokio_clock() {
        let start = Instant::now();
        Pacing::real_time().pause(Duration::from_millis(15)).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(15) && elapsed < Duration::from_millis(17));

        let start = Instant::now();
        Pacing::instant().pause(Duration::from_millis(15)).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
