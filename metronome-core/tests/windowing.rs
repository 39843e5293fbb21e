// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use assert2::check;
use metronome_clock::{Clock, fakes::MockClock};
use metronome_core::{Counter, DistributionSummary, StepRegistry, Statistic, Tags};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rstest::rstest;

const STEP_MILLIS: u64 = 1_000;

fn registry_at(millis: u64) -> (MockClock, StepRegistry) {
    let mock = MockClock::at_millis(millis);
    let registry = StepRegistry::builder()
        .step(Duration::from_millis(STEP_MILLIS))
        .clock(Clock::custom(mock.clone()))
        .build();
    (mock, registry)
}

/// Every value shows up in the window containing the time it was recorded at,
/// as long as the publisher snapshots every step.
#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn each_value_lands_in_its_window(#[case] seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (mock, registry) = registry_at(0);
    let counter = registry.counter("events", Tags::empty()).unwrap();

    let mut expected: BTreeMap<u64, f64> = BTreeMap::new();
    let mut published: BTreeMap<u64, f64> = BTreeMap::new();
    let mut now = 0;
    for _ in 0..500 {
        let advance = rng.random_range(0..300);
        let next = now + advance;
        // snapshot at every boundary crossed, like a publisher would
        for boundary in (now / STEP_MILLIS + 1)..=(next / STEP_MILLIS) {
            let at = boundary * STEP_MILLIS;
            let set = registry.snapshot_at(at);
            published.insert(at - STEP_MILLIS, set.meters()[0].value(Statistic::Count).unwrap());
        }
        now = next;
        mock.set_wall_time(std::time::UNIX_EPOCH + Duration::from_millis(now));

        let amount = f64::from(rng.random_range(1..10u32));
        counter.increment_by(amount);
        *expected.entry(now / STEP_MILLIS * STEP_MILLIS).or_default() += amount;
    }

    for (window, total) in expected {
        if window + STEP_MILLIS <= now {
            check!(published.get(&window) == Some(&total), "window {window}");
        }
    }
}

#[test]
fn idle_gap_publishes_zero_windows_then_resumes() {
    let (mock, registry) = registry_at(0);
    let counter = registry.counter("events", Tags::empty()).unwrap();
    counter.increment();
    mock.add_millis(STEP_MILLIS);
    check!(registry.snapshot().meters()[0].value(Statistic::Count) == Some(1.0));

    for _ in 0..5 {
        mock.add_millis(STEP_MILLIS);
        check!(registry.snapshot().meters()[0].value(Statistic::Count) == Some(0.0));
    }

    counter.increment_by(4.0);
    mock.add_millis(STEP_MILLIS);
    check!(registry.snapshot().meters()[0].value(Statistic::Count) == Some(4.0));
}

/// A snapshot that reads the clock just before a boundary, while a recorder
/// has already crossed it, must not publish the newer window early.
#[test]
fn snapshot_behind_a_recorder_publishes_each_value_once() {
    let (mock, registry) = registry_at(1_500);
    let counter = registry.counter("events", Tags::empty()).unwrap();
    counter.increment();
    mock.set_wall_time(std::time::UNIX_EPOCH + Duration::from_millis(2_001));
    counter.increment_by(3.0);

    let lagging = registry.snapshot_at(1_999);
    let next = registry.snapshot_at(2_001);
    let count = |set: &metronome_core::MeasurementSet| {
        set.meters()
            .first()
            .and_then(|m| m.value(Statistic::Count))
            .unwrap_or(0.0)
    };
    check!(count(&lagging) == 0.0);
    check!(count(&next) == 1.0);
    check!(next.timestamp_millis() == 2_000);

    mock.add_millis(STEP_MILLIS);
    check!(count(&registry.snapshot()) == 3.0);
}

#[test]
fn concurrent_recording_totals_are_exact() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let (mock, registry) = registry_at(0);
    let counter = registry.counter("bytes", Tags::empty()).unwrap();
    let summary = DistributionSummary::builder("sizes").register(&registry).unwrap();

    let plans: Vec<Vec<u32>> = (0..8)
        .map(|_| (0..rng.random_range(100..1000)).map(|_| rng.random_range(0..5000)).collect())
        .collect();
    let total: u64 = plans.iter().flatten().map(|&a| u64::from(a)).sum();
    let count: usize = plans.iter().map(Vec::len).sum();
    let max = plans.iter().flatten().copied().max().unwrap_or(0);

    std::thread::scope(|s| {
        for plan in &plans {
            let counter: Counter = counter.clone();
            let summary = summary.clone();
            s.spawn(move || {
                for &amount in plan {
                    counter.increment_by(f64::from(amount));
                    summary.record(f64::from(amount));
                }
            });
        }
    });

    mock.add_millis(STEP_MILLIS);
    let set = registry.snapshot();
    let by_name = |name: &str| {
        set.meters()
            .iter()
            .find(|m| m.id().name() == name)
            .cloned()
            .unwrap()
    };
    check!(by_name("bytes").value(Statistic::Count) == Some(total as f64));
    let sizes = by_name("sizes");
    check!(sizes.value(Statistic::Count) == Some(count as f64));
    check!(sizes.value(Statistic::Total) == Some(total as f64));
    check!(sizes.value(Statistic::Max) == Some(f64::from(max)));
}

#[test]
fn concurrent_registration_and_traversal() {
    let (_, registry) = registry_at(0);
    let registry = Arc::new(registry);
    std::thread::scope(|s| {
        for t in 0..4 {
            let registry = registry.clone();
            s.spawn(move || {
                for i in 0..200 {
                    registry
                        .counter("requests", Tags::of([("worker", format!("{t}-{}", i % 50))]))
                        .unwrap()
                        .increment();
                }
            });
        }
        s.spawn(|| {
            for _ in 0..50 {
                let seen = registry.meters().count();
                assert!(seen <= 200);
            }
        });
    });
    check!(registry.len() == 200);
}
