// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Meters that applications record into.
//!
//! All meters are cheap to clone handles around shared state. Recording never
//! fails and never waits on publishing.

use std::{borrow::Cow, sync::Arc};

use crate::{MeterId, MeterKind, Tags};

mod counter;
mod gauge;
mod summary;
mod timer;

pub use counter::{Counter, CounterBuilder};
pub use gauge::{Gauge, GaugeBuilder};
pub use summary::{DistributionSummary, DistributionSummaryBuilder};
pub use timer::{Timer, TimerBuilder};

/// Any registered meter.
#[derive(Debug, Clone)]
pub enum Meter {
    /// A counter
    Counter(Counter),
    /// A timer
    Timer(Timer),
    /// A distribution summary
    DistributionSummary(DistributionSummary),
    /// A gauge
    Gauge(Gauge),
}

impl Meter {
    /// Identity of the meter
    pub fn id(&self) -> &Arc<MeterId> {
        match self {
            Self::Counter(m) => m.id(),
            Self::Timer(m) => m.id(),
            Self::DistributionSummary(m) => m.id(),
            Self::Gauge(m) => m.id(),
        }
    }

    /// Kind of the meter
    pub fn kind(&self) -> MeterKind {
        self.id().kind()
    }
}

/// Name, tags and description shared by all meter builders.
#[derive(Debug, Clone)]
struct Common {
    name: Cow<'static, str>,
    tags: Tags,
    description: Option<Cow<'static, str>>,
}

impl Common {
    fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            tags: Tags::empty(),
            description: None,
        }
    }

    fn id(self, kind: MeterKind) -> MeterId {
        MeterId::new(self.name, self.tags, kind).with_description(self.description)
    }
}

/// Adds the `tags`/`tag`/`description` setters to a builder with a `common` field.
macro_rules! common_builder_methods {
    () => {
        /// Replace the meter's tags
        pub fn tags(mut self, tags: $crate::Tags) -> Self {
            self.common.tags = tags;
            self
        }

        /// Add one tag
        pub fn tag(
            mut self,
            key: impl Into<std::borrow::Cow<'static, str>>,
            value: impl Into<std::borrow::Cow<'static, str>>,
        ) -> Self {
            self.common.tags = self.common.tags.and(key, value);
            self
        }

        /// Human-readable description, sent to backends that support it
        pub fn description(
            mut self,
            description: impl Into<std::borrow::Cow<'static, str>>,
        ) -> Self {
            self.common.description = Some(description.into());
            self
        }
    };
}
pub(crate) use common_builder_methods;
