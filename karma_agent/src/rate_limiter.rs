use std::time::Duration;

use tokio::time::Instant;

/// Enforces the mandatory 500 ms inter-call spacing against the
/// marketplace (spec.md §4.8's concurrency model / Scenario S2).
/// Consulted before every `MarketplaceClient` call within a tick.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub const DEFAULT_SPACING: Duration = Duration::from_millis(500);

    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    /// Sleeps just long enough that the next call starts at least
    /// `min_interval` after the previous one, then records the new call
    /// time.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        self.last_call = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SPACING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_call_waits_out_the_remaining_spacing() {
        let mut limiter = RateLimiter::new(Duration::from_millis(500));
        limiter.wait().await;
        let start = Instant::now();
        tokio::time::advance(Duration::from_millis(100)).await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn call_after_spacing_has_elapsed_does_not_wait() {
        let mut limiter = RateLimiter::new(Duration::from_millis(500));
        limiter.wait().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
