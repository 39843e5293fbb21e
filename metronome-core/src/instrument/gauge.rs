// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    borrow::Cow,
    fmt,
    sync::{Arc, Weak},
};

use super::{Common, common_builder_methods};
use crate::{BaseUnit, MeterId, MeterKind, RecordingError, StepRegistry};

type Sampler = Box<dyn Fn() -> f64 + Send + Sync>;

/// Samples an instantaneous value at publish time.
///
/// Gauges are not windowed. `NaN` means "no data" and is never published.
#[derive(Clone)]
pub struct Gauge(Arc<Inner>);

struct Inner {
    id: Arc<MeterId>,
    sample: Sampler,
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge").field("id", &self.0.id).finish_non_exhaustive()
    }
}

impl Gauge {
    /// Build a gauge that calls `sample` on every publish
    pub fn builder(
        name: impl Into<Cow<'static, str>>,
        sample: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> GaugeBuilder {
        GaugeBuilder {
            common: Common::new(name),
            base_unit: BaseUnit::None,
            sample: Box::new(sample),
        }
    }

    /// Build a gauge over a weakly-held object.
    ///
    /// The registry does not keep `object` alive. Once every strong reference is
    /// dropped the gauge reports no data.
    ///
    /// ```
    /// # use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
    /// # use metronome_core::{Gauge, StepRegistry};
    /// let registry = StepRegistry::builder().build();
    /// let queue = Arc::new(AtomicUsize::new(3));
    /// let depth = Gauge::builder_weak("queue.depth", &queue, |q| q.load(Ordering::Relaxed) as f64)
    ///     .register(&registry)
    ///     .unwrap();
    /// assert_eq!(depth.value(), 3.0);
    /// drop(queue);
    /// assert!(depth.value().is_nan());
    /// ```
    pub fn builder_weak<T: Send + Sync + 'static>(
        name: impl Into<Cow<'static, str>>,
        object: &Arc<T>,
        sample: impl Fn(&T) -> f64 + Send + Sync + 'static,
    ) -> GaugeBuilder {
        let weak: Weak<T> = Arc::downgrade(object);
        Self::builder(name, move || weak.upgrade().map_or(f64::NAN, |o| sample(&o)))
    }

    pub(crate) fn new(id: Arc<MeterId>, sample: Sampler) -> Self {
        Self(Arc::new(Inner { id, sample }))
    }

    /// Sample the current value
    pub fn value(&self) -> f64 {
        (self.0.sample)()
    }

    /// Identity of this gauge
    pub fn id(&self) -> &Arc<MeterId> {
        &self.0.id
    }
}

/// Builder for [`Gauge`].
#[must_use]
pub struct GaugeBuilder {
    common: Common,
    base_unit: BaseUnit,
    sample: Sampler,
}

impl fmt::Debug for GaugeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeBuilder")
            .field("common", &self.common)
            .field("base_unit", &self.base_unit)
            .finish_non_exhaustive()
    }
}

impl GaugeBuilder {
    common_builder_methods!();

    /// Unit of the sampled value. Strings are parsed with [`BaseUnit::parse`].
    pub fn base_unit(mut self, unit: impl Into<BaseUnit>) -> Self {
        self.base_unit = unit.into();
        self
    }

    /// Register with `registry`.
    ///
    /// If a gauge with the same name and tags already exists it is returned and
    /// this builder's sampler is discarded.
    pub fn register(self, registry: &StepRegistry) -> Result<Gauge, RecordingError> {
        let id = self
            .common
            .id(MeterKind::Gauge)
            .with_base_unit(self.base_unit);
        registry.gauge_with_id(id, self.sample)
    }
}
