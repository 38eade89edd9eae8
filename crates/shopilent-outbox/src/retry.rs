use std::time::Duration;

/// What to do after a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounded exponential backoff.
///
/// Delay for the n-th failure is `base * 2^(n-1)`, capped at `max_backoff`,
/// plus up to 10% jitter when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(3600),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// `retry_count` is the number of failures including the one just seen.
    pub fn decide(&self, retry_count: i32) -> RetryDecision {
        if retry_count >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.backoff(retry_count))
    }

    pub fn backoff(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.saturating_sub(1).clamp(0, 30) as u32;
        let delay = self
            .base_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_millis() as u64 / 10;
        delay + Duration::from_millis(fastrand::u64(0..=spread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 4,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            jitter: false,
        }
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
        assert_eq!(policy.backoff(400), Duration::from_secs(10));
    }

    #[test]
    fn gives_up_at_max_retries() {
        let policy = policy();
        assert_eq!(policy.decide(3), RetryDecision::RetryAfter(Duration::from_secs(8)));
        assert_eq!(policy.decide(4), RetryDecision::GiveUp);
        assert_eq!(policy.decide(9), RetryDecision::GiveUp);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy()
        };
        for _ in 0..100 {
            let delay = policy.backoff(3);
            assert!(delay >= Duration::from_secs(8));
            assert!(delay <= Duration::from_millis(8_800));
        }
    }
}
