// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::{
    fmt::Debug,
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

/// Fake clocks for tests.
///
/// Requires the `test-util` feature.
#[cfg(feature = "test-util")]
pub mod fakes;

/// A source of wall-clock and monotonic time.
///
/// Wall-clock time decides which step window a recording lands in. Monotonic
/// time is only used to measure elapsed durations (for example by
/// `Timer::time`), so it never has to agree with the wall clock.
pub trait Time: Send + Sync + Debug {
    /// Current wall-clock time
    fn wall_time(&self) -> SystemTime;

    /// Current monotonic instant
    fn monotonic(&self) -> Instant;
}

/// Tokio-backed clock.
///
/// Follows tokio's paused/advanced time, which is what makes
/// `#[tokio::test(start_paused = true)]` tests of the publishing loop
/// deterministic. Requires the `tokio` feature.
#[cfg(feature = "tokio")]
pub mod tokio {
    use std::time::{Instant, SystemTime};

    use tokio::time::Instant as TokioInstant;

    use crate::{Clock, Time};

    impl Clock {
        /// A clock that starts at `start` and moves forward with tokio time.
        ///
        /// ```
        /// # #[tokio::main(flavor = "current_thread")]
        /// # async fn main() {
        /// use std::time::{Duration, UNIX_EPOCH};
        /// use metronome_clock::Clock;
        ///
        /// tokio::time::pause();
        /// let clock = Clock::tokio(UNIX_EPOCH);
        /// tokio::time::advance(Duration::from_millis(1500)).await;
        /// assert_eq!(clock.wall_time_millis(), 1500);
        /// # }
        /// ```
        pub fn tokio(start: SystemTime) -> Self {
            Clock::custom(TokioClock::initialize_at(start))
        }
    }

    /// Clock anchored to a wall-clock time at the tokio instant it was created.
    #[derive(Copy, Clone, Debug)]
    pub struct TokioClock {
        anchor: TokioInstant,
        anchor_wall_time: SystemTime,
    }

    impl TokioClock {
        /// Anchor the clock at the real current wall-clock time.
        pub fn initialize() -> Self {
            Self::initialize_at(SystemTime::now())
        }

        /// Anchor the clock so that "now" reads as `wall_time`.
        pub fn initialize_at(wall_time: SystemTime) -> Self {
            Self {
                anchor: TokioInstant::now(),
                anchor_wall_time: wall_time,
            }
        }
    }

    impl Time for TokioClock {
        fn wall_time(&self) -> SystemTime {
            self.anchor_wall_time + self.anchor.elapsed()
        }

        fn monotonic(&self) -> Instant {
            TokioInstant::now().into_std()
        }
    }

}

/// The clock handed to registries and publishers.
///
/// Cloning is cheap. [`Clock::System`] reads the operating system clocks.
#[derive(Clone, Default)]
pub enum Clock {
    /// Operating system time
    #[default]
    System,
    /// A custom [`Time`] implementation
    Custom(Arc<dyn Time>),
}

impl Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "Clock::System"),
            Self::Custom(inner) => write!(f, "Clock::Custom({inner:?})"),
        }
    }
}

impl Clock {
    /// Wrap a custom [`Time`] implementation.
    pub fn custom(time: impl Time + 'static) -> Self {
        Self::Custom(Arc::new(time))
    }

    /// Current wall-clock time.
    pub fn wall_time(&self) -> SystemTime {
        match self {
            Self::System => SystemTime::now(),
            Self::Custom(time) => time.wall_time(),
        }
    }

    /// Current monotonic instant.
    pub fn monotonic(&self) -> Instant {
        match self {
            Self::System => Instant::now(),
            Self::Custom(time) => time.monotonic(),
        }
    }

    /// Milliseconds since the Unix epoch. Times before the epoch read as 0.
    pub fn wall_time_millis(&self) -> u64 {
        millis_since_epoch(self.wall_time())
    }
}

/// Milliseconds between the Unix epoch and `time`, saturating at 0 and `u64::MAX`.
pub fn millis_since_epoch(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}
