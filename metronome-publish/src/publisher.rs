// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use metronome_core::{StepRegistry, step::Step};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    Encoded, Encoder, HttpRequest, HttpSender, MetadataCall, PublishError, RetryPolicy,
    throttle::LogThrottle,
    transport::{Outcome, classify_status},
};

/// Called with every failure that is not retried away.
pub type ErrorHook = Arc<dyn Fn(&PublishError) + Send + Sync>;

/// Where the publisher is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PublisherState {
    /// No cycle in flight
    Idle = 0,
    /// Snapshotting, encoding or sending
    Publishing = 1,
    /// Waiting to retry a transient failure
    BackingOff = 2,
}

impl PublisherState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Publishing,
            2 => Self::BackingOff,
            _ => Self::Idle,
        }
    }
}

/// Running totals over the publisher's lifetime.
#[derive(Debug, Default)]
pub struct PublisherStats {
    cycles: AtomicU64,
    cycles_skipped: AtomicU64,
    batches_sent: AtomicU64,
    batches_dropped: AtomicU64,
    retries: AtomicU64,
    points_skipped: AtomicU64,
    metadata_sent: AtomicU64,
    metadata_failed: AtomicU64,
}

macro_rules! stat_getters {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        impl PublisherStats {
            $(
                $(#[$doc])*
                pub fn $name(&self) -> u64 {
                    self.$name.load(Ordering::Relaxed)
                }
            )*
        }
    };
}

stat_getters!(
    /// Cycles started
    cycles,
    /// Scheduled ticks skipped because a cycle was in flight
    cycles_skipped,
    /// Batches delivered
    batches_sent,
    /// Batches given up on
    batches_dropped,
    /// Retries after transient failures
    retries,
    /// Points or meters the encoder could not represent
    points_skipped,
    /// Metadata registrations delivered
    metadata_sent,
    /// Metadata registrations that failed
    metadata_failed,
);

fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(by as u64, Ordering::Relaxed);
}

/// What one successful cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Meters in the snapshot
    pub meters: usize,
    /// Batches delivered
    pub batches_sent: usize,
    /// Retries needed
    pub retries: u32,
    /// Points or meters left out by the encoder
    pub points_skipped: usize,
    /// Metadata registrations delivered
    pub metadata_sent: usize,
    /// Metadata registrations that failed
    pub metadata_failed: usize,
}

struct Shared<E, S> {
    registry: StepRegistry,
    encoder: E,
    sender: S,
    retry: RetryPolicy,
    interval: Duration,
    enabled: bool,
    hook: ErrorHook,
    state: AtomicU8,
    stats: PublisherStats,
}

/// Periodically snapshots a registry, encodes it and sends it.
///
/// Only one cycle is ever in flight: a scheduled tick that finds a cycle
/// running is skipped. Transient failures are retried with backoff, bounded
/// so that a cycle never runs into the next tick. Permanent failures abort the
/// cycle and go to the error hook.
///
/// Cloning is cheap. Closing is explicit via [`Publisher::close`]; dropping
/// handles does not stop the scheduled task.
pub struct Publisher<E, S> {
    shared: Arc<Shared<E, S>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl<E, S> Clone for Publisher<E, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            tasks: self.tasks.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<E, S> fmt::Debug for Publisher<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("enabled", &self.shared.enabled)
            .field("interval", &self.shared.interval)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Marker type to ensure that an encoder is always set.
#[derive(Default, Debug)]
#[non_exhaustive]
pub struct YouMustConfigureAnEncoder;

/// Marker type to ensure that a sender is always set.
#[derive(Default, Debug)]
#[non_exhaustive]
pub struct YouMustConfigureASender;

/// Builder for [`Publisher`].
///
/// `build` is only available once an encoder and a sender are configured:
///
/// ```compile_fail
/// use metronome_publish::Publisher;
/// let publisher = Publisher::builder().build(Default::default());
/// ```
#[must_use]
pub struct PublisherBuilder<E = YouMustConfigureAnEncoder, S = YouMustConfigureASender> {
    encoder: E,
    sender: S,
    enabled: bool,
    interval: Option<Duration>,
    retry: RetryPolicy,
    hook: Option<ErrorHook>,
}

impl<E, S> fmt::Debug for PublisherBuilder<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherBuilder")
            .field("enabled", &self.enabled)
            .field("interval", &self.interval)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Default for PublisherBuilder {
    fn default() -> Self {
        Self {
            encoder: YouMustConfigureAnEncoder,
            sender: YouMustConfigureASender,
            enabled: true,
            interval: None,
            retry: RetryPolicy::default(),
            hook: None,
        }
    }
}

impl<E, S> PublisherBuilder<E, S> {
    /// The wire encoder
    pub fn encoder<E2: Encoder>(self, encoder: E2) -> PublisherBuilder<E2, S> {
        PublisherBuilder {
            encoder,
            sender: self.sender,
            enabled: self.enabled,
            interval: self.interval,
            retry: self.retry,
            hook: self.hook,
        }
    }

    /// The transport
    pub fn sender<S2: HttpSender>(self, sender: S2) -> PublisherBuilder<E, S2> {
        PublisherBuilder {
            encoder: self.encoder,
            sender,
            enabled: self.enabled,
            interval: self.interval,
            retry: self.retry,
            hook: self.hook,
        }
    }

    /// Whether to publish on a schedule. Manual [`Publisher::publish`] calls
    /// work either way. Defaults to `true`.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Time between scheduled cycles. Defaults to the registry's step.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is shorter than one millisecond.
    pub fn interval(mut self, interval: Duration) -> Self {
        assert!(
            interval >= Duration::from_millis(1),
            "publish interval must be at least 1ms"
        );
        self.interval = Some(interval);
        self
    }

    /// Backoff for transient failures
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Called with permanent failures and encoding failures. Defaults to logging
    /// them at error level.
    pub fn error_hook(mut self, hook: impl Fn(&PublishError) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }
}

impl<E: Encoder, S: HttpSender> PublisherBuilder<E, S> {
    /// Build the publisher for `registry`.
    ///
    /// When enabled this spawns the scheduling task, so it must be called from
    /// within a Tokio runtime.
    #[track_caller]
    pub fn build(self, registry: StepRegistry) -> Publisher<E, S> {
        let interval = self.interval.unwrap_or_else(|| registry.step().duration());
        let hook: ErrorHook = match self.hook {
            Some(hook) => hook,
            None => Arc::new(|err: &PublishError| {
                tracing::error!(error = %err, "metrics publish failed")
            }),
        };
        let publisher = Publisher {
            shared: Arc::new(Shared {
                registry,
                encoder: self.encoder,
                sender: self.sender,
                retry: self.retry,
                interval,
                enabled: self.enabled,
                hook,
                state: AtomicU8::new(PublisherState::Idle as u8),
                stats: PublisherStats::default(),
            }),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        };
        if publisher.shared.enabled {
            publisher.spawn_scheduler();
        } else {
            tracing::debug!("scheduled publishing disabled");
        }
        publisher.tasks.close();
        publisher
    }
}

impl Publisher<YouMustConfigureAnEncoder, YouMustConfigureASender> {
    /// Start configuring a publisher
    pub fn builder() -> PublisherBuilder {
        PublisherBuilder::default()
    }
}

impl<E: Encoder, S: HttpSender> Publisher<E, S> {
    fn spawn_scheduler(&self) {
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let interval = shared.interval;
            let now_millis = shared.registry.clock().wall_time_millis();
            // fire just after each interval boundary so the step has closed
            let first =
                Step::new(interval).until_next_boundary(now_millis) + Duration::from_millis(1);
            let mut ticks = tokio::time::interval_at(Instant::now() + first, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                let tick = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    tick = ticks.tick() => tick,
                };
                tracing::trace!("scheduled publish");
                match shared.run_cycle(&cancel, Some(tick + interval)).await {
                    Ok(report) => tracing::debug!(?report, "published metrics"),
                    Err(PublishError::AlreadyPublishing) => {
                        bump(&shared.stats.cycles_skipped, 1);
                        tracing::debug!("skipping scheduled publish, a cycle is already in flight");
                    }
                    Err(PublishError::Closed) => break,
                    // already reported by the cycle
                    Err(_) => {}
                }
            }
            tracing::debug!("publisher stopped");
        });
    }

    /// Run one cycle now.
    ///
    /// Works whether or not scheduled publishing is enabled. Fails fast with
    /// [`PublishError::AlreadyPublishing`] if a cycle is in flight and with
    /// [`PublishError::Closed`] after [`Publisher::close`].
    pub async fn publish(&self) -> Result<PublishReport, PublishError> {
        if self.cancel.is_cancelled() {
            return Err(PublishError::Closed);
        }
        self.shared.run_cycle(&self.cancel, None).await
    }
}

impl<E, S> Publisher<E, S> {
    /// Stop scheduled publishing and abort any in-flight send or backoff.
    ///
    /// Data not yet sent is not flushed.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tasks.wait().await;
    }

    /// Whether [`Publisher::close`] was called
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current state
    pub fn state(&self) -> PublisherState {
        PublisherState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Lifetime statistics
    pub fn stats(&self) -> &PublisherStats {
        &self.shared.stats
    }

    /// The registry being published
    pub fn registry(&self) -> &StepRegistry {
        &self.shared.registry
    }

    /// The encoder
    pub fn encoder(&self) -> &E {
        &self.shared.encoder
    }

    /// Whether scheduled publishing is enabled
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled
    }

    /// Time between scheduled cycles
    pub fn interval(&self) -> Duration {
        self.shared.interval
    }
}

/// Resets the state to idle when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicU8);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(PublisherState::Idle as u8, Ordering::Release);
    }
}

static SKIPPED_POINTS: LogThrottle = LogThrottle::new(Duration::from_secs(60));

impl<E: Encoder, S: HttpSender> Shared<E, S> {
    fn claim(&self) -> Result<CycleGuard<'_>, PublishError> {
        self.state
            .compare_exchange(
                PublisherState::Idle as u8,
                PublisherState::Publishing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| PublishError::AlreadyPublishing)?;
        Ok(CycleGuard(&self.state))
    }

    fn set_state(&self, state: PublisherState) {
        self.state.store(state as u8, Ordering::Release);
    }

    async fn run_cycle(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<PublishReport, PublishError> {
        let _guard = self.claim()?;
        bump(&self.stats.cycles, 1);

        let set = self.registry.snapshot();
        let Encoded {
            batches,
            metadata,
            skipped,
        } = match self.encoder.encode(&set) {
            Ok(encoded) => encoded,
            Err(err) => {
                let err = PublishError::from(err);
                (self.hook)(&err);
                return Err(err);
            }
        };
        let mut report = PublishReport {
            meters: set.len(),
            points_skipped: skipped.len(),
            ..PublishReport::default()
        };
        drop(set);

        if !skipped.is_empty() {
            bump(&self.stats.points_skipped, skipped.len());
            for reason in &skipped {
                tracing::debug!(%reason, "skipped data point");
            }
            SKIPPED_POINTS.run(|| {
                tracing::warn!(
                    skipped = skipped.len(),
                    example = %skipped[0],
                    "some data points could not be encoded and were skipped"
                )
            });
        }

        let total = batches.len();
        for (i, batch) in batches.iter().enumerate() {
            match self.send_with_retry(batch, cancel, deadline, &mut report).await {
                Ok(()) => {
                    report.batches_sent += 1;
                    bump(&self.stats.batches_sent, 1);
                    tracing::debug!(
                        batch = i + 1,
                        of = total,
                        bytes = batch.body.len(),
                        "sent batch"
                    );
                }
                Err(err) => {
                    let dropped = total - i;
                    bump(&self.stats.batches_dropped, dropped);
                    metadata.into_iter().for_each(MetadataCall::release);
                    match &err {
                        PublishError::Permanent { .. } => (self.hook)(&err),
                        PublishError::Closed => {
                            tracing::debug!(dropped, "publisher closed mid-cycle")
                        }
                        _ => tracing::warn!(
                            dropped,
                            error = %err,
                            "dropping the rest of this publish cycle"
                        ),
                    }
                    return Err(err);
                }
            }
        }

        let mut calls = metadata.into_iter();
        while let Some(call) = calls.next() {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.sender.send(call.request()) => Some(result),
            };
            let Some(result) = result else {
                call.release();
                calls.for_each(MetadataCall::release);
                return Err(PublishError::Closed);
            };
            let failure = match result {
                Ok(response) => match classify_status(response.status) {
                    Outcome::Success => None,
                    Outcome::Transient => Some(PublishError::Transient {
                        reason: format!("status {}", response.status),
                        attempts: 1,
                    }),
                    Outcome::Permanent => Some(PublishError::Permanent {
                        status: response.status,
                        body: response.body,
                    }),
                },
                Err(err) => Some(PublishError::Transient {
                    reason: err.to_string(),
                    attempts: 1,
                }),
            };
            let permanent = matches!(failure, Some(PublishError::Permanent { .. }));
            match failure {
                None => {
                    report.metadata_sent += 1;
                    bump(&self.stats.metadata_sent, 1);
                }
                Some(err) => {
                    report.metadata_failed += 1;
                    bump(&self.stats.metadata_failed, 1);
                    if permanent {
                        (self.hook)(&err);
                    } else {
                        tracing::warn!(
                            metric = call.name(),
                            error = %err,
                            "metadata registration failed"
                        );
                    }
                }
            }
            call.commit();
            if permanent {
                calls.for_each(MetadataCall::release);
                break;
            }
        }

        Ok(report)
    }

    async fn send_with_retry(
        &self,
        request: &HttpRequest,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        report: &mut PublishReport,
    ) -> Result<(), PublishError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PublishError::Closed),
                result = self.sender.send(request) => result,
            };
            let reason = match result {
                Ok(response) => match classify_status(response.status) {
                    Outcome::Success => return Ok(()),
                    Outcome::Permanent => {
                        return Err(PublishError::Permanent {
                            status: response.status,
                            body: response.body,
                        });
                    }
                    Outcome::Transient => format!("status {}", response.status),
                },
                Err(err) => err.to_string(),
            };

            let Some(delay) = self.retry.backoff(attempts) else {
                return Err(PublishError::Transient { reason, attempts });
            };
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    return Err(PublishError::Transient {
                        reason: format!(
                            "{reason}, and the next retry would overrun the publish interval"
                        ),
                        attempts,
                    });
                }
            }

            report.retries += 1;
            bump(&self.stats.retries, 1);
            tracing::warn!(
                attempt = attempts,
                ?delay,
                %reason,
                "transient publish failure, backing off"
            );
            self.set_state(PublisherState::BackingOff);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PublishError::Closed),
                _ = tokio::time::sleep(delay) => {}
            }
            self.set_state(PublisherState::Publishing);
        }
    }
}
