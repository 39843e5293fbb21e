// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    borrow::Cow,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use hashbrown::HashMap;
use metronome_clock::Clock;

use crate::{
    BaseUnit, Counter, DistributionSummary, Gauge, Meter, MeterId, MeterKind, RecordingError, Tags,
    TimeScale, Timer,
    id::MeterKey,
    snapshot::{MeasurementSet, SnapshotBuilder, ZeroActivityPolicy},
    step::Step,
};

const DEFAULT_STEP: Duration = Duration::from_secs(60);

/// What a meter needs from its registry when it is created.
#[derive(Debug, Clone)]
pub(crate) struct MeterContext {
    pub(crate) step: Step,
    pub(crate) clock: Clock,
    pub(crate) base_time_unit: TimeScale,
}

#[derive(Debug, Default)]
struct Meters {
    by_key: HashMap<MeterKey, Meter>,
    // kind each name is bound to, and how many meters use the name
    kinds: HashMap<Cow<'static, str>, (MeterKind, usize)>,
    // removed since the last snapshot, with the index of the window they were
    // removed in
    retired: Vec<(u64, Meter)>,
}

#[derive(Debug)]
struct Inner {
    ctx: MeterContext,
    zero_activity: ZeroActivityPolicy,
    common_tags: Tags,
    meters: RwLock<Meters>,
    closed: AtomicBool,
}

/// Owns meters and the step they aggregate over.
///
/// Cloning is cheap and clones share the same meters.
///
/// Lookups of existing meters take a shared lock on the meter table; only the
/// first registration of a name and tag set takes the exclusive lock.
/// Recording into a meter never touches the table at all.
#[derive(Debug, Clone)]
pub struct StepRegistry(Arc<Inner>);

impl Default for StepRegistry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StepRegistry {
    /// Configure a registry
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    /// Get or register a counter
    pub fn counter(
        &self,
        name: impl Into<Cow<'static, str>>,
        tags: Tags,
    ) -> Result<Counter, RecordingError> {
        Counter::builder(name).tags(tags).register(self)
    }

    /// Get or register a timer
    pub fn timer(
        &self,
        name: impl Into<Cow<'static, str>>,
        tags: Tags,
    ) -> Result<Timer, RecordingError> {
        Timer::builder(name).tags(tags).register(self)
    }

    /// Get or register a distribution summary
    pub fn summary(
        &self,
        name: impl Into<Cow<'static, str>>,
        tags: Tags,
    ) -> Result<DistributionSummary, RecordingError> {
        DistributionSummary::builder(name).tags(tags).register(self)
    }

    /// Get or register a gauge sampling `sample`
    pub fn gauge(
        &self,
        name: impl Into<Cow<'static, str>>,
        tags: Tags,
        sample: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Result<Gauge, RecordingError> {
        Gauge::builder(name, sample).tags(tags).register(self)
    }

    /// Get or register a gauge over a weakly-held object
    pub fn gauge_weak<T: Send + Sync + 'static>(
        &self,
        name: impl Into<Cow<'static, str>>,
        tags: Tags,
        object: &Arc<T>,
        sample: impl Fn(&T) -> f64 + Send + Sync + 'static,
    ) -> Result<Gauge, RecordingError> {
        Gauge::builder_weak(name, object, sample).tags(tags).register(self)
    }

    pub(crate) fn counter_with_id(&self, id: MeterId) -> Result<Counter, RecordingError> {
        match self.register(id, |id, ctx| Meter::Counter(Counter::new(id, ctx)))? {
            Meter::Counter(counter) => Ok(counter),
            other => Err(self.mismatch(&other, MeterKind::Counter)),
        }
    }

    pub(crate) fn timer_with_id(
        &self,
        id: MeterId,
        publish_histogram: bool,
    ) -> Result<Timer, RecordingError> {
        let id = id.with_base_unit(BaseUnit::Time(self.0.ctx.base_time_unit));
        let make = |id, ctx: &MeterContext| Meter::Timer(Timer::new(id, ctx, publish_histogram));
        match self.register(id, make)? {
            Meter::Timer(timer) => Ok(timer),
            other => Err(self.mismatch(&other, MeterKind::Timer)),
        }
    }

    pub(crate) fn summary_with_id(
        &self,
        id: MeterId,
        scale: f64,
        publish_histogram: bool,
    ) -> Result<DistributionSummary, RecordingError> {
        let make = |id, ctx: &MeterContext| {
            Meter::DistributionSummary(DistributionSummary::new(id, ctx, scale, publish_histogram))
        };
        match self.register(id, make)? {
            Meter::DistributionSummary(summary) => Ok(summary),
            other => Err(self.mismatch(&other, MeterKind::DistributionSummary)),
        }
    }

    pub(crate) fn gauge_with_id(
        &self,
        id: MeterId,
        sample: Box<dyn Fn() -> f64 + Send + Sync>,
    ) -> Result<Gauge, RecordingError> {
        match self.register(id, |id, _| Meter::Gauge(Gauge::new(id, sample)))? {
            Meter::Gauge(gauge) => Ok(gauge),
            other => Err(self.mismatch(&other, MeterKind::Gauge)),
        }
    }

    fn mismatch(&self, existing: &Meter, requested: MeterKind) -> RecordingError {
        RecordingError::KindMismatch {
            name: existing.id().name().to_owned(),
            existing: existing.kind(),
            requested,
        }
    }

    fn register(
        &self,
        id: MeterId,
        make: impl FnOnce(Arc<MeterId>, &MeterContext) -> Meter,
    ) -> Result<Meter, RecordingError> {
        if self.is_closed() {
            return Err(RecordingError::Closed);
        }
        validate_name(id.name())?;
        id.tags().validate(id.name())?;

        let tags = self.0.common_tags.clone().merge(id.tags());
        let id = id.with_tags(tags);
        let key = id.key();

        if let Some(existing) = self.0.meters.read().unwrap().by_key.get(&key) {
            return self.same_kind(existing, id.kind());
        }

        let mut meters = self.0.meters.write().unwrap();
        if let Some(existing) = meters.by_key.get(&key) {
            return self.same_kind(existing, id.kind());
        }
        if let Some(&(existing, _)) = meters.kinds.get(id.name())
            && existing != id.kind()
        {
            return Err(RecordingError::KindMismatch {
                name: id.name().to_owned(),
                existing,
                requested: id.kind(),
            });
        }

        let meter = match revive(&mut meters.retired, &key, id.kind()) {
            Some(meter) => {
                tracing::debug!(meter = %meter.id(), "reviving removed meter");
                meter
            }
            None => {
                let id = Arc::new(id);
                tracing::debug!(meter = %id, kind = %id.kind(), "registering meter");
                make(id, &self.0.ctx)
            }
        };
        meters
            .kinds
            .entry(Cow::Owned(meter.id().name().to_owned()))
            .or_insert((meter.kind(), 0))
            .1 += 1;
        meters.by_key.insert(key, meter.clone());
        Ok(meter)
    }

    fn same_kind(&self, existing: &Meter, requested: MeterKind) -> Result<Meter, RecordingError> {
        if existing.kind() == requested {
            Ok(existing.clone())
        } else {
            Err(self.mismatch(existing, requested))
        }
    }

    /// Remove a meter.
    ///
    /// A removed meter is included in the next snapshot one last time, then
    /// forgotten. Handles held by the application keep working but their
    /// recordings are no longer published.
    ///
    /// A removed meter that no snapshot picked up within a step is dropped,
    /// so a registry that is never published does not accumulate them.
    /// Registering the same identity again before the next snapshot revives
    /// the removed counter, timer or summary with its unpublished step; a
    /// removed gauge is replaced.
    pub fn remove(&self, id: &MeterId) -> Option<Meter> {
        let now = self.0.ctx.step.index_of(self.0.ctx.clock.wall_time_millis());
        let mut meters = self.0.meters.write().unwrap();
        let removed = meters.by_key.remove(&id.key())?;
        if let Some(entry) = meters.kinds.get_mut(id.name()) {
            entry.1 -= 1;
            if entry.1 == 0 {
                meters.kinds.remove(id.name());
            }
        }
        meters.retired.retain(|(removed_in, _)| removed_in + 1 >= now);
        meters.retired.push((now, removed.clone()));
        Some(removed)
    }

    /// All registered meters.
    ///
    /// The iterator owns cloned handles, so it holds no lock. Meters registered
    /// after this call are not included; call again to restart.
    pub fn meters(&self) -> impl Iterator<Item = Meter> + use<> {
        let meters = self.0.meters.read().unwrap();
        meters.by_key.values().cloned().collect::<Vec<_>>().into_iter()
    }

    /// Call `f` on every registered meter
    pub fn for_each_meter(&self, mut f: impl FnMut(&Meter)) {
        for meter in self.meters() {
            f(&meter);
        }
    }

    pub(crate) fn take_retired(&self) -> Vec<Meter> {
        let retired = std::mem::take(&mut self.0.meters.write().unwrap().retired);
        retired.into_iter().map(|(_, meter)| meter).collect()
    }

    /// Number of registered meters
    pub fn len(&self) -> usize {
        self.0.meters.read().unwrap().by_key.len()
    }

    /// Whether no meters are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Roll every meter over to the clock's current time and freeze the last
    /// completed step.
    pub fn snapshot(&self) -> MeasurementSet {
        self.snapshot_at(self.0.ctx.clock.wall_time_millis())
    }

    /// Like [`StepRegistry::snapshot`] as of `now_millis`.
    pub fn snapshot_at(&self, now_millis: u64) -> MeasurementSet {
        SnapshotBuilder::new(self.0.zero_activity).build(self, now_millis)
    }

    /// The clock meters read
    pub fn clock(&self) -> &Clock {
        &self.0.ctx.clock
    }

    /// The step meters aggregate over
    pub fn step(&self) -> Step {
        self.0.ctx.step
    }

    /// Unit timers report in
    pub fn base_time_unit(&self) -> TimeScale {
        self.0.ctx.base_time_unit
    }

    /// Zero-activity policy used by [`StepRegistry::snapshot`]
    pub fn zero_activity(&self) -> ZeroActivityPolicy {
        self.0.zero_activity
    }

    /// Stop accepting new meters. Existing meters keep recording.
    pub fn close(&self) {
        if !self.0.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("registry closed");
        }
    }

    /// Whether [`StepRegistry::close`] was called
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }
}

/// Take a removed meter with `key` out of `retired`, to register it again.
fn revive(retired: &mut Vec<(u64, Meter)>, key: &MeterKey, kind: MeterKind) -> Option<Meter> {
    let position = retired.iter().position(|(_, meter)| &meter.id().key() == key)?;
    let (_, meter) = retired.swap_remove(position);
    (meter.kind() == kind && kind != MeterKind::Gauge).then_some(meter)
}

fn validate_name(name: &str) -> Result<(), RecordingError> {
    if name.is_empty() || name.chars().any(char::is_control) {
        Err(RecordingError::InvalidName(name.to_owned()))
    } else {
        Ok(())
    }
}

/// Builder for [`StepRegistry`]
#[derive(Debug, Clone)]
#[must_use]
pub struct StepRegistryBuilder {
    step: Duration,
    clock: Clock,
    base_time_unit: TimeScale,
    zero_activity: ZeroActivityPolicy,
    common_tags: Tags,
}

impl Default for StepRegistryBuilder {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            clock: Clock::System,
            base_time_unit: TimeScale::Millisecond,
            zero_activity: ZeroActivityPolicy::default(),
            common_tags: Tags::empty(),
        }
    }
}

impl StepRegistryBuilder {
    /// Window length. Defaults to 60 seconds.
    ///
    /// # Panics
    ///
    /// Panics if `step` is shorter than one millisecond.
    pub fn step(mut self, step: Duration) -> Self {
        assert!(step >= Duration::from_millis(1), "step must be at least 1ms");
        self.step = step;
        self
    }

    /// Clock used for step boundaries and timers. Defaults to system time.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Unit timers report totals and max in. Defaults to milliseconds.
    pub fn base_time_unit(mut self, unit: TimeScale) -> Self {
        self.base_time_unit = unit;
        self
    }

    /// Whether meters with no activity in a step are part of the snapshot
    pub fn zero_activity(mut self, policy: ZeroActivityPolicy) -> Self {
        self.zero_activity = policy;
        self
    }

    /// Tags added to every meter. A meter's own tags win on conflicts.
    pub fn common_tags(mut self, tags: Tags) -> Self {
        self.common_tags = tags;
        self
    }

    /// Build the registry
    pub fn build(self) -> StepRegistry {
        StepRegistry(Arc::new(Inner {
            ctx: MeterContext {
                step: Step::new(self.step),
                clock: self.clock,
                base_time_unit: self.base_time_unit,
            },
            zero_activity: self.zero_activity,
            common_tags: self.common_tags,
            meters: RwLock::new(Meters::default()),
            closed: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use assert2::check;
    use metronome_clock::fakes::MockClock;

    use super::*;

    fn registry() -> (MockClock, StepRegistry) {
        let mock = MockClock::at_millis(0);
        let registry = StepRegistry::builder()
            .step(Duration::from_secs(10))
            .clock(Clock::custom(mock.clone()))
            .build();
        (mock, registry)
    }

    #[test]
    fn registration_is_idempotent() {
        let (_, registry) = registry();
        let a = registry.counter("hits", Tags::of([("a", "1"), ("b", "2")])).unwrap();
        let b = registry.counter("hits", Tags::of([("b", "2"), ("a", "1")])).unwrap();
        a.increment();
        b.increment();
        check!(registry.len() == 1);
        check!(Arc::ptr_eq(a.id(), b.id()));
    }

    #[test]
    fn different_tags_are_different_meters() {
        let (_, registry) = registry();
        registry.counter("hits", Tags::of([("a", "1")])).unwrap();
        registry.counter("hits", Tags::of([("a", "2")])).unwrap();
        check!(registry.len() == 2);
    }

    #[test]
    fn kind_is_bound_per_name() {
        let (_, registry) = registry();
        registry.counter("latency", Tags::of([("op", "get")])).unwrap();
        let err = registry.timer("latency", Tags::of([("op", "put")])).unwrap_err();
        check!(
            err == RecordingError::KindMismatch {
                name: "latency".into(),
                existing: MeterKind::Counter,
                requested: MeterKind::Timer,
            }
        );
        let err = registry.summary("latency", Tags::of([("op", "get")])).unwrap_err();
        check!(matches!(err, RecordingError::KindMismatch { .. }));
    }

    #[test]
    fn name_is_released_after_last_removal() {
        let (_, registry) = registry();
        let counter = registry.counter("jobs", Tags::empty()).unwrap();
        check!(registry.remove(counter.id()).is_some());
        check!(registry.remove(counter.id()).is_none());
        registry.timer("jobs", Tags::empty()).unwrap();
    }

    fn count_of(set: &MeasurementSet, name: &str) -> Vec<f64> {
        set.meters()
            .iter()
            .filter(|m| m.id().name() == name)
            .filter_map(|m| m.value(crate::Statistic::Count))
            .collect()
    }

    #[test]
    fn re_registration_revives_a_removed_meter() {
        let (mock, registry) = registry();
        let counter = registry.counter("jobs", Tags::empty()).unwrap();
        counter.increment_by(2.0);
        registry.remove(counter.id());
        registry.counter("jobs", Tags::empty()).unwrap().increment_by(3.0);
        check!(registry.0.meters.read().unwrap().retired.is_empty());

        mock.add_millis(10_000);
        check!(count_of(&registry.snapshot(), "jobs") == [5.0]);
    }

    #[test]
    fn removed_gauge_is_replaced_on_re_registration() {
        let (_, registry) = registry();
        let gauge = registry.gauge("depth", Tags::empty(), || 1.0).unwrap();
        registry.remove(gauge.id());
        registry.gauge("depth", Tags::empty(), || 2.0).unwrap();
        let set = registry.snapshot();
        let values: Vec<_> = set
            .meters()
            .iter()
            .filter_map(|m| m.value(crate::Statistic::Value))
            .collect();
        check!(values == [2.0]);
    }

    #[test]
    fn unpublished_removals_are_dropped_after_a_step() {
        let (mock, registry) = registry();
        for name in ["a", "b"] {
            let counter = registry.counter(name, Tags::empty()).unwrap();
            registry.remove(counter.id());
        }
        check!(registry.0.meters.read().unwrap().retired.len() == 2);

        mock.add_millis(20_000);
        let counter = registry.counter("c", Tags::empty()).unwrap();
        registry.remove(counter.id());
        let retired = registry.take_retired();
        check!(retired.len() == 1);
        check!(retired[0].id().name() == "c");
    }

    #[test]
    fn invalid_identity_is_rejected() {
        let (_, registry) = registry();
        let err = registry.counter("", Tags::empty()).unwrap_err();
        check!(err == RecordingError::InvalidName("".into()));
        check!(matches!(
            registry.counter("a\nb", Tags::empty()),
            Err(RecordingError::InvalidName(_))
        ));
        check!(matches!(
            registry.counter("ok", Tags::of([("", "v")])),
            Err(RecordingError::InvalidTag { .. })
        ));
    }

    #[test]
    fn closed_registry_rejects_new_meters() {
        let (_, registry) = registry();
        let counter = registry.counter("before", Tags::empty()).unwrap();
        registry.close();
        check!(registry.is_closed());
        check!(registry.counter("after", Tags::empty()).unwrap_err() == RecordingError::Closed);
        counter.increment();
    }

    #[test]
    fn common_tags_are_merged() {
        let registry = StepRegistry::builder()
            .common_tags(Tags::of([("env", "prod"), ("host", "a")]))
            .build();
        let counter = registry.counter("hits", Tags::of([("host", "b")])).unwrap();
        check!(counter.id().tags().get("env") == Some("prod"));
        check!(counter.id().tags().get("host") == Some("b"));
    }

    #[test]
    fn timers_report_in_base_time_unit() {
        let (mock, registry) = registry();
        let timer = registry.timer("t", Tags::empty()).unwrap();
        check!(timer.id().base_unit() == &BaseUnit::MILLISECONDS);
        timer.record(Duration::from_micros(1500));
        timer.time(|| mock.add(Duration::from_millis(2)));
        mock.add_millis(10_000);
        let window = timer.window();
        check!(window.count == 2);
        check!(window.total == 3.5);
        check!(window.max == 2.0);
    }

    #[test]
    fn concurrent_first_registration_yields_one_meter() {
        let (_, registry) = registry();
        let barrier = Barrier::new(8);
        let ids: Vec<Arc<MeterId>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        let counter = registry.counter("race", Tags::empty()).unwrap();
                        counter.increment();
                        counter.id().clone()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        check!(registry.len() == 1);
        check!(ids.iter().all(|id| Arc::ptr_eq(id, &ids[0])));
    }

    #[test]
    fn traversal_is_restartable() {
        let (_, registry) = registry();
        registry.counter("a", Tags::empty()).unwrap();
        let mut first = registry.meters();
        check!(first.next().is_some());
        registry.counter("b", Tags::empty()).unwrap();
        check!(first.next().is_none());
        check!(registry.meters().count() == 2);
        let mut seen = 0;
        registry.for_each_meter(|_| seen += 1);
        check!(seen == 2);
    }
}
