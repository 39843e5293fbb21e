// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

fn secs_since_start() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    Instant::now()
        .duration_since(*START.get_or_init(Instant::now))
        .as_secs()
}

/// Lets a log line through at most once per interval, across threads.
///
/// Used for warnings that would otherwise repeat every publish cycle, such as
/// a gauge that keeps reporting infinity. The first call always passes.
#[derive(Debug)]
pub struct LogThrottle {
    interval_secs: u64,
    next_secs: AtomicU64,
}

impl LogThrottle {
    /// A throttle passing once per `interval`.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is shorter than one second.
    pub const fn new(interval: Duration) -> Self {
        assert!(
            interval.as_secs() >= 1,
            "only second-level granularity supported for log throttling"
        );
        Self {
            interval_secs: interval.as_secs(),
            next_secs: AtomicU64::new(0),
        }
    }

    /// Run `log` if the interval has elapsed since it last ran
    pub fn run(&self, log: impl FnOnce()) {
        let now = secs_since_start();
        let next = self.next_secs.load(Ordering::Relaxed);
        if next > now {
            return;
        }
        let new_next = now.saturating_add(self.interval_secs);
        if self
            .next_secs
            .compare_exchange(next, new_next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            log();
        }
    }
}
