// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{borrow::Cow, sync::Arc};

use super::{Common, common_builder_methods};
use crate::{
    BaseUnit, MeterId, MeterKind, RecordingError, StepRegistry,
    registry::MeterContext,
    step::{Distribution, DistributionWindow, StepValue},
};

/// Records amounts such as payload sizes.
///
/// Reports count, total and max per step.
#[derive(Debug, Clone)]
pub struct DistributionSummary(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    id: Arc<MeterId>,
    value: StepValue<Distribution>,
    scale: f64,
}

impl DistributionSummary {
    /// Start building a distribution summary
    pub fn builder(name: impl Into<Cow<'static, str>>) -> DistributionSummaryBuilder {
        DistributionSummaryBuilder {
            common: Common::new(name),
            base_unit: BaseUnit::None,
            scale: 1.0,
            publish_histogram: false,
        }
    }

    pub(crate) fn new(
        id: Arc<MeterId>,
        ctx: &MeterContext,
        scale: f64,
        publish_histogram: bool,
    ) -> Self {
        let accumulator = if publish_histogram {
            Distribution::with_histogram()
        } else {
            Distribution::default()
        };
        Self(Arc::new(Inner {
            id,
            value: StepValue::with_accumulator(ctx.step, ctx.clock.clone(), accumulator),
            scale,
        }))
    }

    /// Record one amount. Negative and NaN amounts are ignored.
    pub fn record(&self, amount: f64) {
        if amount.is_nan() || amount < 0.0 {
            return;
        }
        let amount = amount * self.0.scale;
        self.0.value.record_with(|d| d.record(amount));
    }

    /// The last completed step
    pub fn window(&self) -> DistributionWindow {
        self.0.value.poll()
    }

    /// Identity of this summary
    pub fn id(&self) -> &Arc<MeterId> {
        &self.0.id
    }

    pub(crate) fn poll_at(&self, now_millis: u64) -> DistributionWindow {
        self.0.value.poll_at(now_millis)
    }
}

/// Builder for [`DistributionSummary`].
#[derive(Debug, Clone)]
#[must_use]
pub struct DistributionSummaryBuilder {
    common: Common,
    base_unit: BaseUnit,
    scale: f64,
    publish_histogram: bool,
}

impl DistributionSummaryBuilder {
    common_builder_methods!();

    /// Unit of the recorded amounts. Strings are parsed with [`BaseUnit::parse`].
    pub fn base_unit(mut self, unit: impl Into<BaseUnit>) -> Self {
        self.base_unit = unit.into();
        self
    }

    /// Multiply every recorded amount by `scale`.
    ///
    /// # Panics
    ///
    /// Panics if `scale` is not finite and positive.
    pub fn scale(mut self, scale: f64) -> Self {
        assert!(scale.is_finite() && scale > 0.0, "scale must be finite and positive");
        self.scale = scale;
        self
    }

    /// Also track histogram buckets of the recorded amounts
    pub fn publish_histogram(mut self, enabled: bool) -> Self {
        self.publish_histogram = enabled;
        self
    }

    /// Register with `registry`, or return the summary already registered
    /// under the same name and tags.
    pub fn register(self, registry: &StepRegistry) -> Result<DistributionSummary, RecordingError> {
        let id = self
            .common
            .id(MeterKind::DistributionSummary)
            .with_base_unit(self.base_unit);
        registry.summary_with_id(id, self.scale, self.publish_histogram)
    }
}
