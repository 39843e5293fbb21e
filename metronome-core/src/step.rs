// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Step-aligned accumulation.
//!
//! Time is cut into fixed windows `[k * step, (k + 1) * step)` of wall-clock
//! milliseconds. A [`StepValue`] accumulates into the window that contains
//! "now" and keeps the last completed window around for publishing.
//!
//! Rollover is a pure function of the last window index, the current time and
//! the step, evaluated lazily by whoever touches the value next. Recording
//! takes a shared lock and rollover the exclusive lock, both per value, so a
//! recording that observed time `t` always lands in the window containing `t`.

use std::{
    fmt::Debug,
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use metronome_clock::Clock;

use crate::{
    atomic::AtomicF64,
    histogram::{Bucket, BucketHistogram},
};

/// The fixed window length of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Step {
    millis: u64,
}

impl Step {
    /// Create a step from a duration.
    ///
    /// # Panics
    ///
    /// Panics if `duration` is shorter than one millisecond.
    pub fn new(duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        assert!(millis >= 1, "step must be at least 1ms");
        Self { millis }
    }

    /// Step length in milliseconds
    pub fn millis(self) -> u64 {
        self.millis
    }

    /// Step length
    pub fn duration(self) -> Duration {
        Duration::from_millis(self.millis)
    }

    /// Index of the window containing `now_millis`
    pub fn index_of(self, now_millis: u64) -> u64 {
        now_millis / self.millis
    }

    /// Start of window `index`, in milliseconds since the epoch
    pub fn start_of(self, index: u64) -> u64 {
        index.saturating_mul(self.millis)
    }

    /// Time left until the next boundary after `now_millis`
    pub fn until_next_boundary(self, now_millis: u64) -> Duration {
        Duration::from_millis(self.millis - now_millis % self.millis)
    }
}

impl From<Duration> for Step {
    fn from(duration: Duration) -> Self {
        Step::new(duration)
    }
}

/// State accumulated during one window.
///
/// [`Accumulator::take`] is only ever called under the exclusive lock of the
/// owning [`StepValue`], so it does not have to be atomic with respect to
/// concurrent recordings.
pub trait Accumulator: Send + Sync + 'static {
    /// Frozen contents of a completed window
    type Window: Clone + Default + Send + Sync + Debug;

    /// Read out the accumulated state and reset to empty.
    fn take(&self) -> Self::Window;
}

#[derive(Debug)]
struct StepState<W> {
    index: u64,
    previous: W,
}

/// An accumulator for the current window plus the frozen previous window.
#[derive(Debug)]
pub struct StepValue<A: Accumulator> {
    step: Step,
    clock: Clock,
    state: RwLock<StepState<A::Window>>,
    current: A,
}

impl<A: Accumulator + Default> StepValue<A> {
    /// Create a step value whose current window is the one containing the clock's "now".
    pub fn new(step: Step, clock: Clock) -> Self {
        Self::with_accumulator(step, clock, A::default())
    }
}

impl<A: Accumulator> StepValue<A> {
    /// Create a step value around a preconfigured accumulator.
    pub fn with_accumulator(step: Step, clock: Clock, current: A) -> Self {
        let index = step.index_of(clock.wall_time_millis());
        Self {
            step,
            clock,
            state: RwLock::new(StepState {
                index,
                previous: A::Window::default(),
            }),
            current,
        }
    }

    /// The step of this value
    pub fn step(&self) -> Step {
        self.step
    }

    /// Apply `record` to the window containing the clock's current time.
    ///
    /// Rolls over first if a boundary was crossed since the last touch.
    pub fn record_with(&self, record: impl Fn(&A)) {
        loop {
            let target = {
                let state = self.state.read().unwrap();
                // read under the lock: a rollover past this instant must wait for us
                let target = self.step.index_of(self.clock.wall_time_millis());
                if target <= state.index {
                    record(&self.current);
                    return;
                }
                target
            };
            self.roll_to(target);
        }
    }

    /// Roll over as of `now_millis`. Idempotent for a given window.
    ///
    /// Crossing one boundary moves the current window into `previous`. Crossing
    /// more than one means the windows in between had no activity, so
    /// `previous` becomes empty and the data from the stale window is dropped.
    pub fn rollover(&self, now_millis: u64) {
        self.roll_to(self.step.index_of(now_millis));
    }

    /// Roll over as of the clock's "now" and return the last completed window.
    pub fn poll(&self) -> A::Window {
        self.poll_at(self.clock.wall_time_millis())
    }

    /// Roll over as of `now_millis` and return the window that completed
    /// right before it.
    ///
    /// If a recording already moved this value past the window containing
    /// `now_millis`, the window asked for is gone and an empty window is
    /// returned. The data held in `previous` then belongs to a later window
    /// and is left for the poll that asks for it.
    pub fn poll_at(&self, now_millis: u64) -> A::Window {
        let target = self.step.index_of(now_millis);
        let mut state = self.state.write().unwrap();
        self.advance(&mut state, target);
        if state.index == target {
            state.previous.clone()
        } else {
            A::Window::default()
        }
    }

    /// The last completed window, without rolling over.
    pub fn previous(&self) -> A::Window {
        self.state.read().unwrap().previous.clone()
    }

    /// Index of the window currently accepting writes.
    pub fn current_index(&self) -> u64 {
        self.state.read().unwrap().index
    }

    fn roll_to(&self, target: u64) {
        let mut state = self.state.write().unwrap();
        self.advance(&mut state, target);
    }

    fn advance(&self, state: &mut StepState<A::Window>, target: u64) {
        if target <= state.index {
            return;
        }
        let crossed = target - state.index;
        let completed = self.current.take();
        state.previous = if crossed == 1 {
            completed
        } else {
            tracing::trace!(crossed, "catching up on idle steps");
            A::Window::default()
        };
        state.index = target;
    }
}

/// Accumulates a sum.
#[derive(Debug, Default)]
pub struct Sum(AtomicF64);

impl Sum {
    /// Add `amount`
    pub fn add(&self, amount: f64) {
        self.0.add(amount);
    }
}

impl Accumulator for Sum {
    type Window = f64;

    fn take(&self) -> f64 {
        self.0.take()
    }
}

/// Accumulates count, total and max of a distribution, and optionally buckets.
#[derive(Debug, Default)]
pub struct Distribution {
    count: AtomicU64,
    total: AtomicF64,
    max: AtomicF64,
    histogram: Option<BucketHistogram>,
}

impl Distribution {
    /// A distribution that also tracks histogram buckets
    pub fn with_histogram() -> Self {
        Self {
            histogram: Some(BucketHistogram::new()),
            ..Self::default()
        }
    }

    /// Record one amount
    pub fn record(&self, amount: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.add(amount);
        self.max.fetch_max(amount);
        if let Some(histogram) = &self.histogram {
            histogram.record(amount);
        }
    }
}

/// A completed window of a [`Distribution`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistributionWindow {
    /// Number of recordings
    pub count: u64,
    /// Sum of recorded amounts
    pub total: f64,
    /// Largest recorded amount, 0 when nothing was recorded
    pub max: f64,
    /// Non-empty histogram buckets, empty when buckets are not tracked
    pub buckets: Vec<Bucket>,
}

impl DistributionWindow {
    /// Mean of the recorded amounts, `None` for an empty window
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }
}

impl Accumulator for Distribution {
    type Window = DistributionWindow;

    fn take(&self) -> DistributionWindow {
        DistributionWindow {
            count: self.count.swap(0, Ordering::AcqRel),
            total: self.total.take(),
            max: self.max.take(),
            buckets: self
                .histogram
                .as_ref()
                .map(BucketHistogram::drain)
                .unwrap_or_default(),
        }
    }
}
