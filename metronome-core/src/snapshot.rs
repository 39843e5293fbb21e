// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Freezing the last completed step of every meter.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    Meter, MeterId, StepRegistry,
    histogram::Bucket,
    statistic::{Measurement, Statistic},
    step::{DistributionWindow, Step},
};

/// Whether meters without activity in a step are published.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ZeroActivityPolicy {
    /// Publish zero sums for idle meters. Max and gauge values that have no
    /// data are still left out.
    #[default]
    Include,
    /// Leave idle meters and gauges without data out of the snapshot
    Omit,
}

/// The last completed step of one meter.
#[derive(Debug, Clone)]
pub struct MeterSnapshot {
    id: Arc<MeterId>,
    measurements: SmallVec<[Measurement; 3]>,
    buckets: Vec<Bucket>,
}

impl MeterSnapshot {
    /// Build a snapshot by hand, mostly useful for testing encoders.
    pub fn new(id: Arc<MeterId>, measurements: impl IntoIterator<Item = Measurement>) -> Self {
        Self {
            id,
            measurements: measurements.into_iter().collect(),
            buckets: Vec::new(),
        }
    }

    /// Attach histogram buckets
    pub fn with_buckets(mut self, buckets: Vec<Bucket>) -> Self {
        self.buckets = buckets;
        self
    }

    /// Identity of the meter
    pub fn id(&self) -> &Arc<MeterId> {
        &self.id
    }

    /// Measured statistics
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Value of `statistic`, if measured
    pub fn value(&self, statistic: Statistic) -> Option<f64> {
        self.measurements
            .iter()
            .find(|m| m.statistic == statistic)
            .map(|m| m.value)
    }

    /// Histogram buckets, empty unless the meter tracks them
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }
}

/// An immutable, timestamped view of one completed step across a registry.
#[derive(Debug, Clone)]
pub struct MeasurementSet {
    timestamp_millis: u64,
    step: Step,
    meters: Vec<MeterSnapshot>,
}

impl MeasurementSet {
    /// Assemble a measurement set by hand
    pub fn new(timestamp_millis: u64, step: Step, meters: Vec<MeterSnapshot>) -> Self {
        Self {
            timestamp_millis,
            step,
            meters,
        }
    }

    /// End of the completed step, in milliseconds since the epoch
    pub fn timestamp_millis(&self) -> u64 {
        self.timestamp_millis
    }

    /// Step length of the registry the set came from
    pub fn step(&self) -> Step {
        self.step
    }

    /// Per-meter snapshots
    pub fn meters(&self) -> &[MeterSnapshot] {
        &self.meters
    }

    /// Number of meters in the set
    pub fn len(&self) -> usize {
        self.meters.len()
    }

    /// Whether the set has no meters
    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    /// Every `(meter, statistic, value)` triple in the set
    pub fn measurements(&self) -> impl Iterator<Item = (&MeterId, Statistic, f64)> {
        self.meters.iter().flat_map(|meter| {
            meter
                .measurements
                .iter()
                .map(move |m| (&*meter.id, m.statistic, m.value))
        })
    }
}

/// Builds a [`MeasurementSet`] from a registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotBuilder {
    zero_activity: ZeroActivityPolicy,
}

impl SnapshotBuilder {
    /// Builder applying `zero_activity`
    pub fn new(zero_activity: ZeroActivityPolicy) -> Self {
        Self { zero_activity }
    }

    /// Roll every meter over as of `now_millis` and freeze its last completed step.
    ///
    /// Rolling over is idempotent per step, so building twice within one step
    /// returns the same data. Gauges are sampled live. Meters removed since the
    /// previous snapshot are included one final time.
    pub fn build(&self, registry: &StepRegistry, now_millis: u64) -> MeasurementSet {
        let step = registry.step();
        let timestamp_millis = step.start_of(step.index_of(now_millis));
        let meters = registry
            .meters()
            .chain(registry.take_retired())
            .filter_map(|meter| self.meter(&meter, now_millis))
            .collect();
        MeasurementSet {
            timestamp_millis,
            step,
            meters,
        }
    }

    fn meter(&self, meter: &Meter, now_millis: u64) -> Option<MeterSnapshot> {
        let id = meter.id().clone();
        let (measurements, buckets): (SmallVec<[Measurement; 3]>, _) = match meter {
            Meter::Counter(counter) => {
                let count = counter.poll_at(now_millis);
                if count == 0.0 && self.omit_idle() {
                    return None;
                }
                (smallvec::smallvec![Measurement::new(Statistic::Count, count)], Vec::new())
            }
            Meter::Timer(timer) => {
                self.distribution(timer.poll_at(now_millis), Statistic::TotalTime)?
            }
            Meter::DistributionSummary(summary) => {
                self.distribution(summary.poll_at(now_millis), Statistic::Total)?
            }
            Meter::Gauge(gauge) => {
                let value = gauge.value();
                if value.is_nan() {
                    if self.omit_idle() {
                        return None;
                    }
                    (SmallVec::new(), Vec::new())
                } else {
                    (smallvec::smallvec![Measurement::new(Statistic::Value, value)], Vec::new())
                }
            }
        };
        Some(MeterSnapshot {
            id,
            measurements,
            buckets,
        })
    }

    fn distribution(
        &self,
        window: DistributionWindow,
        total: Statistic,
    ) -> Option<(SmallVec<[Measurement; 3]>, Vec<Bucket>)> {
        if window.count == 0 {
            if self.omit_idle() {
                return None;
            }
            return Some((
                smallvec::smallvec![
                    Measurement::new(Statistic::Count, 0.0),
                    Measurement::new(total, 0.0),
                ],
                Vec::new(),
            ));
        }
        Some((
            smallvec::smallvec![
                Measurement::new(Statistic::Count, window.count as f64),
                Measurement::new(total, window.total),
                Measurement::new(Statistic::Max, window.max),
            ],
            window.buckets,
        ))
    }

    fn omit_idle(&self) -> bool {
        self.zero_activity == ZeroActivityPolicy::Omit
    }
}
