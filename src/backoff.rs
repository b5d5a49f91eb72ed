use std::time::Duration;
use tokio::time::sleep;

/// Retry pacing for connection attempts: `delay = base * attempt`
#[derive(Debug)]
pub struct RetryBackoff {
    base_delay: Duration,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug, PartialEq)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl RetryBackoff {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
            current_attempt: 0,
        }
    }

    /// Delay before the next retry, or `None` when retries are used up
    pub fn next_delay(&self) -> Option<Duration> {
        if self.current_attempt >= self.max_retries {
            return None;
        }
        Some(self.base_delay.saturating_mul(self.current_attempt.saturating_add(1)))
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        let delay = self.next_delay().ok_or(MaxRetriesExceeded)?;
        self.current_attempt += 1;

        log::warn!(
            "⏳ Retry attempt {} of {} in {:?}",
            self.current_attempt,
            self.max_retries,
            delay
        );

        sleep(delay).await;
        Ok(())
    }

    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Poll cadence that doubles under rate limiting, capped at `max`
#[derive(Debug, Clone)]
pub struct Cadence {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Cadence {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Double the interval; returns the new value
    pub fn back_off(&mut self) -> Duration {
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
