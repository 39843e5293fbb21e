// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{borrow::Cow, sync::Arc};

use super::{Common, common_builder_methods};
use crate::{
    BaseUnit, MeterId, MeterKind, RecordingError, StepRegistry,
    registry::MeterContext,
    step::{StepValue, Sum},
};

/// Counts events per step.
///
/// The published value is the total added during the last completed step.
#[derive(Debug, Clone)]
pub struct Counter(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    id: Arc<MeterId>,
    value: StepValue<Sum>,
}

impl Counter {
    /// Start building a counter
    pub fn builder(name: impl Into<Cow<'static, str>>) -> CounterBuilder {
        CounterBuilder {
            common: Common::new(name),
            base_unit: BaseUnit::None,
        }
    }

    pub(crate) fn new(id: Arc<MeterId>, ctx: &MeterContext) -> Self {
        Self(Arc::new(Inner {
            id,
            value: StepValue::new(ctx.step, ctx.clock.clone()),
        }))
    }

    /// Add one
    pub fn increment(&self) {
        self.increment_by(1.0);
    }

    /// Add `amount`
    pub fn increment_by(&self, amount: f64) {
        self.0.value.record_with(|sum| sum.add(amount));
    }

    /// Total of the last completed step
    pub fn count(&self) -> f64 {
        self.0.value.poll()
    }

    /// Identity of this counter
    pub fn id(&self) -> &Arc<MeterId> {
        &self.0.id
    }

    pub(crate) fn poll_at(&self, now_millis: u64) -> f64 {
        self.0.value.poll_at(now_millis)
    }
}

/// Builder for [`Counter`].
#[derive(Debug, Clone)]
#[must_use]
pub struct CounterBuilder {
    common: Common,
    base_unit: BaseUnit,
}

impl CounterBuilder {
    common_builder_methods!();

    /// Unit of the counted amounts. Strings are parsed with [`BaseUnit::parse`].
    pub fn base_unit(mut self, unit: impl Into<BaseUnit>) -> Self {
        self.base_unit = unit.into();
        self
    }

    /// Register with `registry`, or return the counter already registered
    /// under the same name and tags.
    pub fn register(self, registry: &StepRegistry) -> Result<Counter, RecordingError> {
        let id = self
            .common
            .id(MeterKind::Counter)
            .with_base_unit(self.base_unit);
        registry.counter_with_id(id)
    }
}
