use std::time::Duration;

/// Reconnection policy for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay before the first retry; doubled for each further attempt.
    pub base_delay: Duration,
    /// Retries after an abnormal close before the session gives up.
    pub max_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

impl SessionConfig {
    /// `base_delay * 2^attempt`, or `None` once `attempt` reaches the cap.
    pub fn reconnect_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt)?;
        self.base_delay.checked_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_cap() {
        let config = SessionConfig::default();
        let delays: Vec<Option<u128>> = (0..6)
            .map(|attempt| config.reconnect_delay(attempt).map(|d| d.as_millis()))
            .collect();
        assert_eq!(
            delays,
            vec![Some(1000), Some(2000), Some(4000), Some(8000), Some(16000), None]
        );
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let config = SessionConfig {
            base_delay: Duration::from_secs(1),
            max_attempts: u32::MAX,
        };
        assert!(config.reconnect_delay(40).is_none());
        assert_eq!(config.reconnect_delay(3), Some(Duration::from_secs(8)));
    }
}
