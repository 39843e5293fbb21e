// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime},
};

use crate::Time;

#[derive(Debug)]
struct MockState {
    wall_time: SystemTime,
    monotonic: Instant,
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// pass another into a registry.
///
/// ```
/// use metronome_clock::{Clock, fakes::MockClock};
/// use std::time::{Duration, UNIX_EPOCH};
///
/// let mock = MockClock::at_time(UNIX_EPOCH);
/// let clock = Clock::custom(mock.clone());
/// let start = clock.monotonic();
///
/// mock.add(Duration::from_secs(3));
/// assert_eq!(clock.monotonic() - start, Duration::from_secs(3));
/// assert_eq!(clock.wall_time_millis(), 3_000);
/// ```
#[derive(Debug, Clone)]
pub struct MockClock(Arc<Mutex<MockState>>);

impl MockClock {
    /// Start the clock at the given wall-clock time.
    pub fn at_time(time: impl Into<SystemTime>) -> Self {
        Self(Arc::new(Mutex::new(MockState {
            wall_time: time.into(),
            monotonic: Instant::now(),
        })))
    }

    /// Start the clock `millis` milliseconds after the Unix epoch.
    pub fn at_millis(millis: u64) -> Self {
        Self::at_time(SystemTime::UNIX_EPOCH + Duration::from_millis(millis))
    }

    /// Move both wall-clock and monotonic time forward.
    pub fn add(&self, elapsed: Duration) {
        let mut state = self.0.lock().unwrap();
        state.wall_time += elapsed;
        state.monotonic += elapsed;
    }

    /// Move both clocks forward by `millis` milliseconds.
    pub fn add_millis(&self, millis: u64) {
        self.add(Duration::from_millis(millis));
    }

    /// Jump the wall clock to `time` without touching monotonic time.
    ///
    /// Useful for simulating wall-clock adjustments.
    pub fn set_wall_time(&self, time: impl Into<SystemTime>) {
        self.0.lock().unwrap().wall_time = time.into();
    }
}

impl Time for MockClock {
    fn wall_time(&self) -> SystemTime {
        self.0.lock().unwrap().wall_time
    }

    fn monotonic(&self) -> Instant {
        self.0.lock().unwrap().monotonic
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::Clock;

    #[test]
    fn set_wall_time_leaves_monotonic_alone() {
        let mock = MockClock::at_millis(1_000);
        let clock = Clock::custom(mock.clone());
        let before = clock.monotonic();
        mock.set_wall_time(UNIX_EPOCH + Duration::from_secs(90));
        assert_eq!(clock.wall_time_millis(), 90_000);
        assert_eq!(clock.monotonic(), before);
    }
}
