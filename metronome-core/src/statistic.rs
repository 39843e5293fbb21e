// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// What a measured value represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    /// Number of events in the step (counter totals, timer/summary counts)
    Count,
    /// Sum of recorded amounts in the step
    Total,
    /// Sum of recorded durations in the step, in the registry's base time unit
    TotalTime,
    /// Largest recorded amount in the step
    Max,
    /// Instantaneous sampled value
    Value,
}

impl Statistic {
    /// Whether values of this statistic add up across steps.
    pub fn is_cumulative(self) -> bool {
        matches!(self, Self::Count | Self::Total | Self::TotalTime)
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Count => "count",
            Self::Total => "total",
            Self::TotalTime => "total_time",
            Self::Max => "max",
            Self::Value => "value",
        })
    }
}

/// One statistic of one meter for one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Which statistic
    pub statistic: Statistic,
    /// Its value
    pub value: f64,
}

impl Measurement {
    /// Create a measurement
    pub fn new(statistic: Statistic, value: f64) -> Self {
        Self { statistic, value }
    }
}
