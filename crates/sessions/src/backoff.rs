//! Reconnect backoff schedule.

use std::time::Duration;

/// Exponential backoff for session reconnects.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(120),
        }
    }
}

impl ReconnectBackoff {
    /// Delay before reconnect attempt `attempt` (1-based): `base * 2^(n-1)`,
    /// capped at `max`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(1u32 << shift);
        delay.min(self.max)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let backoff = ReconnectBackoff {
            base: Duration::from_secs(2),
            max: Duration::from_secs(10),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(10));
        assert_eq!(backoff.delay(20), Duration::from_secs(10));
    }
}
