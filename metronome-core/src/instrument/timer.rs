// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{borrow::Cow, sync::Arc, time::Duration};

use metronome_clock::Clock;

use super::{Common, common_builder_methods};
use crate::{
    MeterId, MeterKind, RecordingError, StepRegistry, TimeScale,
    registry::MeterContext,
    step::{Distribution, DistributionWindow, StepValue},
};

/// Records durations.
///
/// Reports count, total time and max per step, in the registry's base time
/// unit (milliseconds unless configured otherwise).
#[derive(Debug, Clone)]
pub struct Timer(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    id: Arc<MeterId>,
    value: StepValue<Distribution>,
    scale: TimeScale,
    clock: Clock,
}

impl Timer {
    /// Start building a timer
    pub fn builder(name: impl Into<Cow<'static, str>>) -> TimerBuilder {
        TimerBuilder {
            common: Common::new(name),
            publish_histogram: false,
        }
    }

    pub(crate) fn new(id: Arc<MeterId>, ctx: &MeterContext, publish_histogram: bool) -> Self {
        let accumulator = if publish_histogram {
            Distribution::with_histogram()
        } else {
            Distribution::default()
        };
        Self(Arc::new(Inner {
            id,
            value: StepValue::with_accumulator(ctx.step, ctx.clock.clone(), accumulator),
            scale: ctx.base_time_unit,
            clock: ctx.clock.clone(),
        }))
    }

    /// Record one duration
    pub fn record(&self, duration: Duration) {
        self.record_nanos(duration.as_nanos() as f64);
    }

    /// Record one duration given in nanoseconds. Negative and NaN amounts are ignored.
    pub fn record_nanos(&self, nanos: f64) {
        if nanos.is_nan() || nanos < 0.0 {
            return;
        }
        let amount = self.0.scale.from_nanos(nanos);
        self.0.value.record_with(|d| d.record(amount));
    }

    /// Run `f` and record how long it took on the registry clock.
    pub fn time<R>(&self, f: impl FnOnce() -> R) -> R {
        let start = self.0.clock.monotonic();
        let result = f();
        self.record(self.0.clock.monotonic().saturating_duration_since(start));
        result
    }

    /// The last completed step
    pub fn window(&self) -> DistributionWindow {
        self.0.value.poll()
    }

    /// Unit that totals and max are reported in
    pub fn base_time_unit(&self) -> TimeScale {
        self.0.scale
    }

    /// Identity of this timer
    pub fn id(&self) -> &Arc<MeterId> {
        &self.0.id
    }

    pub(crate) fn poll_at(&self, now_millis: u64) -> DistributionWindow {
        self.0.value.poll_at(now_millis)
    }
}

/// Builder for [`Timer`].
#[derive(Debug, Clone)]
#[must_use]
pub struct TimerBuilder {
    common: Common,
    publish_histogram: bool,
}

impl TimerBuilder {
    common_builder_methods!();

    /// Also track histogram buckets of the recorded durations
    pub fn publish_histogram(mut self, enabled: bool) -> Self {
        self.publish_histogram = enabled;
        self
    }

    /// Register with `registry`, or return the timer already registered
    /// under the same name and tags.
    pub fn register(self, registry: &StepRegistry) -> Result<Timer, RecordingError> {
        registry.timer_with_id(self.common.id(MeterKind::Timer), self.publish_histogram)
    }
}
