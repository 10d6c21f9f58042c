//! Restart policy with capped exponential backoff

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::millis;

/// How a supervisor restarts a failed container
///
/// The n-th consecutive restart waits `base_delay * 2^(n-1)`, capped at
/// `max_delay`. After `max_restarts` restarts the container is left failed.
/// A container that stayed up for `reset_after` starts over at the first
/// delay with a full budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Delay before the first restart
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Upper bound for any delay
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Restarts allowed before giving up
    pub max_restarts: u32,
    /// Uptime after which the failure count is forgotten
    #[serde(with = "millis")]
    pub reset_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_restarts: 5,
            reset_after: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Policy that never restarts
    #[must_use]
    pub fn never() -> Self {
        Self {
            max_restarts: 0,
            ..Self::default()
        }
    }

    /// Set the first delay
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay cap
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the restart budget
    #[must_use]
    pub const fn with_max_restarts(mut self, restarts: u32) -> Self {
        self.max_restarts = restarts;
        self
    }

    /// Set the uptime that resets the budget
    #[must_use]
    pub const fn with_reset_after(mut self, uptime: Duration) -> Self {
        self.reset_after = uptime;
        self
    }

    /// Delay before restart number `attempt` (1-based)
    ///
    /// Returns `None` once the budget is exhausted.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_restarts {
            return None;
        }

        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_capped() {
        let policy = RestartPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_max_restarts(5);

        let delays: Vec<_> = (1..=5).map(|n| policy.delay_for(n).unwrap()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
        assert_eq!(policy.delay_for(6), None);
    }

    #[test]
    fn test_large_attempts_do_not_overflow() {
        let policy = RestartPolicy::default().with_max_restarts(u32::MAX);
        assert_eq!(policy.delay_for(40), Some(policy.max_delay));
        assert_eq!(policy.delay_for(u32::MAX), Some(policy.max_delay));
    }

    #[test]
    fn test_never() {
        assert_eq!(RestartPolicy::never().delay_for(1), None);
    }

    #[test]
    fn test_serde_defaults() {
        let policy: RestartPolicy = serde_json::from_str(r#"{"max_restarts": 2, "base_delay": 250}"#).unwrap();
        assert_eq!(policy.max_restarts, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
