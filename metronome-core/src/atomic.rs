// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` stored as bits in an `AtomicU64`.
///
/// Addition and max are compare-and-swap loops. Overflow follows normal float
/// semantics (sums saturate to infinity).
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl AtomicF64 {
    /// Create a new value
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Current value
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Add `delta`
    pub fn add(&self, delta: f64) {
        self.update(|current| current + delta);
    }

    /// Raise the value to `candidate` if it is larger
    pub fn fetch_max(&self, candidate: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        while candidate > f64::from_bits(current) {
            match self.0.compare_exchange_weak(
                current,
                candidate.to_bits(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Reset to zero, returning the previous value
    pub fn take(&self) -> f64 {
        f64::from_bits(self.0.swap(0f64.to_bits(), Ordering::AcqRel))
    }

    fn update(&self, f: impl Fn(f64) -> f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = f(f64::from_bits(current)).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicF64;

    #[test]
    fn add_and_take() {
        let v = AtomicF64::default();
        v.add(1.5);
        v.add(2.25);
        assert_eq!(v.take(), 3.75);
        assert_eq!(v.get(), 0.0);
    }

    #[test]
    fn max_only_raises() {
        let v = AtomicF64::default();
        v.fetch_max(4.0);
        v.fetch_max(2.0);
        assert_eq!(v.get(), 4.0);
    }

    #[test]
    fn concurrent_adds_are_exact() {
        let v = AtomicF64::default();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        v.add(1.0);
                    }
                });
            }
        });
        assert_eq!(v.get(), 8000.0);
    }
}
