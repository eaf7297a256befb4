//! Randomized latency for simulated downstream calls.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::time::Duration;

/// Mean and standard deviation of a simulated delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyProfile {
    pub mean: Duration,
    pub stddev: Duration,
}

impl LatencyProfile {
    pub fn new(mean: Duration, stddev: Duration) -> Self {
        Self { mean, stddev }
    }

    /// Draw one delay using the thread-local generator.
    pub fn sample(&self) -> Duration {
        self.sample_with(&mut rand::thread_rng())
    }

    /// Draw one delay from `rng`, clamped at zero.
    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let Ok(normal) = Normal::new(self.mean.as_secs_f64(), self.stddev.as_secs_f64()) else {
            return self.mean;
        };
        let seconds = normal.sample(rng).max(0.0);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }
}

/// Sleep for a duration drawn around `mean` with spread `stddev`.
///
/// Returns the duration that was slept. Not cancellation-aware beyond
/// dropping the future.
pub async fn sleep(mean: Duration, stddev: Duration) -> Duration {
    let delay = LatencyProfile::new(mean, stddev).sample();
    tokio::time::sleep(delay).await;
    delay
}
