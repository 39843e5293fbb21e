// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod atomic;
mod error;
pub mod histogram;
mod id;
pub mod instrument;
mod registry;
pub mod snapshot;
mod statistic;
pub mod step;
pub mod unit;

pub use atomic::AtomicF64;
pub use error::RecordingError;
pub use id::{MeterId, MeterKind, Tag, Tags};
pub use instrument::{
    Counter, CounterBuilder, DistributionSummary, DistributionSummaryBuilder, Gauge, GaugeBuilder,
    Meter, Timer, TimerBuilder,
};
pub use registry::{StepRegistry, StepRegistryBuilder};
pub use snapshot::{MeasurementSet, MeterSnapshot, SnapshotBuilder, ZeroActivityPolicy};
pub use statistic::{Measurement, Statistic};
pub use step::Step;
pub use unit::{BaseUnit, PositiveScale, TimeScale};

pub use metronome_clock as clock;
