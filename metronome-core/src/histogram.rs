// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bucketed distribution of recorded values

use std::ops::RangeInclusive;

use histogram::AtomicHistogram;

/// A concurrent histogram that is drained once per step.
///
/// Uses `histogram::Config::new(4, 32)`: 16 buckets per power of two up to
/// `u32::MAX`, so each bucket is within 6.25% of the values it holds. Values are
/// rounded to integers before bucketing; negative values land in the first
/// bucket and values above `u32::MAX` in the last.
pub struct BucketHistogram {
    inner: AtomicHistogram,
}

impl std::fmt::Debug for BucketHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketHistogram").finish_non_exhaustive()
    }
}

impl Default for BucketHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketHistogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        let config = histogram::Config::new(4, 32).expect("known good configuration");
        Self {
            inner: AtomicHistogram::with_config(&config),
        }
    }

    /// Count one occurrence of `value`
    pub fn record(&self, value: f64) {
        let value = value.round().clamp(0.0, u32::MAX as f64) as u64;
        // in range because of the clamp
        let _ = self.inner.add(value, 1);
    }

    /// Non-empty buckets recorded since the last drain, resetting them to zero.
    pub fn drain(&self) -> Vec<Bucket> {
        self.inner
            .drain()
            .into_iter()
            .filter(|bucket| bucket.count() > 0)
            .map(|bucket| Bucket {
                midpoint: midpoint(bucket.range()),
                count: bucket.count(),
            })
            .collect::<Vec<_>>()
    }
}

fn midpoint(range: RangeInclusive<u64>) -> u64 {
    range.start() + (range.end() - range.start()) / 2
}

/// One histogram bucket of a completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Midpoint of the bucket's range
    pub midpoint: u64,
    /// Values that fell in the bucket
    pub count: u64,
}
