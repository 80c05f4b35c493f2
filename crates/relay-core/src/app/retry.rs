//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with an upper bound and optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed (first try included for forwarding, reconnects
    /// only for the supervisor).
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Fraction of the delay randomly added on top (0.0 disables jitter).
    pub jitter: f64,
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self::exponential(0, Duration::from_secs(1))
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before attempt number `attempts + 1`, without jitter.
    ///
    /// delay = base_delay * multiplier^(attempts - 1), capped at `max_delay`.
    /// With base_delay=1s, multiplier=2.0: 1s, 2s, 4s, 8s, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// [`next_delay`](Self::next_delay) plus up to `jitter * delay` of random slack.
    pub fn next_delay_jittered(&self, attempts: u32) -> Duration {
        let delay = self.next_delay(attempts);
        if self.jitter <= 0.0 {
            return delay;
        }
        let slack = delay.mul_f64(self.jitter * rand::thread_rng().r#gen::<f64>());
        delay + slack
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
