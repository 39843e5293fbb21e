// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    /// 3 retries, starting at 1s, doubling, capped at 10s
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self::default().max_retries(0)
    }

    /// Retries after the first attempt
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the first retry
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Upper bound on any single delay
    ///
    /// # Panics
    ///
    /// Panics if `backoff` is zero.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        assert!(!backoff.is_zero(), "max backoff must be non-zero");
        self.max_backoff = backoff;
        self
    }

    /// Growth factor between consecutive delays
    ///
    /// # Panics
    ///
    /// Panics if `multiplier` is below 1 or not finite.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        assert!(
            multiplier.is_finite() && multiplier >= 1.0,
            "backoff multiplier must be finite and at least 1"
        );
        self.multiplier = multiplier;
        self
    }

    /// Configured retry count
    pub fn retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based), or `None` once the
    /// retries are used up.
    pub fn backoff(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries {
            return None;
        }
        let factor = self.multiplier.powi(i32::try_from(retry - 1).unwrap_or(i32::MAX));
        let delay = self.initial_backoff.as_secs_f64() * factor;
        let capped = delay.min(self.max_backoff.as_secs_f64());
        Some(Duration::try_from_secs_f64(capped).unwrap_or(self.max_backoff))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::RetryPolicy;

    #[rstest]
    #[case(1, Some(1_000))]
    #[case(2, Some(2_000))]
    #[case(3, Some(4_000))]
    #[case(4, Some(8_000))]
    #[case(5, Some(10_000))]
    #[case(6, None)]
    #[case(0, None)]
    fn exponential_and_capped(#[case] retry: u32, #[case] millis: Option<u64>) {
        let policy = RetryPolicy::default().max_retries(5);
        assert_eq!(policy.backoff(retry), millis.map(Duration::from_millis));
    }

    #[test]
    fn none_never_retries() {
        assert_eq!(RetryPolicy::none().backoff(1), None);
    }

    #[test]
    #[should_panic(expected = "backoff multiplier")]
    fn rejects_shrinking_backoff() {
        let _ = RetryPolicy::default().multiplier(0.5);
    }
}
