use std::time::Duration;
use tracing::{debug, info};

/// Reconnect timing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay used for the first `fast_retries` attempts
    pub fast_retry_delay: Duration,
    /// Number of attempts made at the fast delay before backing off
    pub fast_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Largest doubling exponent applied to the base delay
    pub max_exponent: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            fast_retry_delay: Duration::from_millis(500),
            fast_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_exponent: 4,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt, given how many attempts already failed
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if failed_attempts < self.fast_retries {
            return self.fast_retry_delay;
        }

        let exponent = (failed_attempts - self.fast_retries).min(self.max_exponent);
        let delay_ms = self.base_delay.as_millis() as u64 * 2_u64.pow(exponent);
        let delay = Duration::from_millis(delay_ms);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Attempt counter driving the reconnect schedule
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Delay for the next attempt; counts the attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        info!(
            "Scheduling reconnect attempt {} in {:?}",
            self.attempts, delay
        );
        delay
    }

    /// Reset after a successful connection or a forced reconnect
    pub fn reset(&mut self) {
        if self.attempts > 0 {
            debug!("Reconnect attempt counter reset after {} attempts", self.attempts);
        }
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}
