// Clock abstraction and bounded polling
// All auth-flow delays go through a Clock so tests can observe them without sleeping

use async_trait::async_trait;
use std::time::Duration;

/// Source of async delays
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedPoll {
    /// Number of delayed re-checks after the initial check
    pub max_attempts: u32,

    /// Delay before each re-check
    pub interval: Duration,
}

impl BoundedPoll {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Upper bound on the total time spent waiting
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Check `probe` immediately, then re-check after each delay until it
    /// yields a value or the attempts run out
    pub async fn until<T, F>(&self, clock: &dyn Clock, mut probe: F) -> Option<T>
    where
        F: FnMut() -> Option<T> + Send,
        T: Send,
    {
        if let Some(value) = probe() {
            return Some(value);
        }

        for attempt in 1..=self.max_attempts {
            clock.sleep(self.interval).await;
            if let Some(value) = probe() {
                tracing::debug!(attempt, "Bounded poll satisfied");
                return Some(value);
            }
        }

        tracing::debug!(
            attempts = self.max_attempts,
            budget_ms = self.budget().as_millis() as u64,
            "Bounded poll exhausted"
        );
        None
    }
}
