// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{Arc, Mutex},
    time::{Duration, UNIX_EPOCH},
};

use assert2::{check, let_assert};
use metronome_clock::Clock;
use metronome_core::{MeasurementSet, MeterId, Statistic, StepRegistry, Tags};
use metronome_publish::{
    Encoded, Encoder, EncodingError, HttpRequest, HttpResponse, MetadataCache, MetadataCall,
    Method, PublishError, Publisher, PublisherState, RetryPolicy, TransportError,
    test_util::{RecordingSender, ScriptedSender},
};

/// One line per measurement, split over `batches` requests, plus a metadata
/// call per metric name.
struct LineEncoder {
    batches: usize,
    cache: MetadataCache,
}

impl LineEncoder {
    fn new(batches: usize) -> Self {
        Self {
            batches,
            cache: MetadataCache::new(),
        }
    }
}

impl Encoder for LineEncoder {
    fn encode(&self, set: &MeasurementSet) -> Result<Encoded, EncodingError> {
        let mut encoded = Encoded::default();
        let mut lines = vec![];
        for (id, statistic, value) in set.measurements() {
            if !value.is_finite() {
                encoded.skipped.push(EncodingError::NonFinite {
                    metric: id.name().to_owned(),
                    statistic,
                    value,
                });
                continue;
            }
            lines.push(format!("{id} {statistic} {value}"));
            if let Some(call) = self.metadata_call(id, statistic)? {
                encoded.metadata.push(call);
            }
        }
        if lines.is_empty() {
            return Ok(encoded);
        }
        let per_batch = lines.len().div_ceil(self.batches);
        for chunk in lines.chunks(per_batch) {
            encoded.batches.push(HttpRequest::json(
                Method::Post,
                "http://backend/series",
                chunk.join("\n").into_bytes(),
            ));
        }
        Ok(encoded)
    }

    fn metadata_call(
        &self,
        id: &MeterId,
        _statistic: Statistic,
    ) -> Result<Option<MetadataCall>, EncodingError> {
        let request = HttpRequest::json(
            Method::Put,
            format!("http://backend/meta/{}", id.name()),
            b"{}".to_vec(),
        );
        Ok(MetadataCall::reserve(&self.cache, id.name(), request))
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn status(status: u16) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::status(status))
}

fn tokio_registry() -> StepRegistry {
    StepRegistry::builder()
        .step(Duration::from_secs(10))
        .clock(Clock::tokio(UNIX_EPOCH))
        .build()
}

fn series(requests: &[HttpRequest]) -> Vec<&HttpRequest> {
    requests.iter().filter(|r| r.method == Method::Post).collect()
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_delivered() {
    init_logging();
    let registry = tokio_registry();
    registry.counter("jobs", Tags::empty()).unwrap().increment_by(3.0);
    let sender = ScriptedSender::default();
    sender.push(status(503));
    sender.push(Err(TransportError::Connect("refused".into())));
    let publisher = Publisher::builder()
        .encoder(LineEncoder::new(1))
        .sender(sender.clone())
        .enabled(false)
        .retry_policy(RetryPolicy::default().max_retries(2))
        .build(registry);

    // close the step the increment landed in
    tokio::time::sleep(Duration::from_secs(10)).await;
    let report = publisher.publish().await.unwrap();
    check!(report.retries == 2);
    check!(report.batches_sent == 1);
    check!(report.metadata_sent == 1);
    check!(series(&sender.attempts()).len() == 3);
    let delivered: Vec<_> = series(&sender.delivered())
        .iter()
        .map(|r| r.body_str().into_owned())
        .collect();
    check!(delivered == ["jobs count 3"]);
    check!(publisher.stats().retries() == 2);
    check!(publisher.state() == PublisherState::Idle);

    // the next step carries nothing over from the retried one
    tokio::time::sleep(Duration::from_secs(10)).await;
    publisher.publish().await.unwrap();
    let delivered: Vec<_> = series(&sender.delivered())
        .iter()
        .map(|r| r.body_str().into_owned())
        .collect();
    check!(delivered == ["jobs count 3", "jobs count 0"]);
    publisher.close().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_drop_the_cycle_without_delaying_the_next_tick() {
    init_logging();
    let registry = tokio_registry();
    registry.counter("jobs", Tags::empty()).unwrap().increment();
    let sender = ScriptedSender::new([status(503), status(503)]);
    let publisher = Publisher::builder()
        .encoder(LineEncoder::new(1))
        .sender(sender.clone())
        .retry_policy(
            RetryPolicy::default()
                .max_retries(5)
                .initial_backoff(Duration::from_secs(4))
                .max_backoff(Duration::from_secs(60)),
        )
        .build(registry);
    check!(publisher.interval() == Duration::from_secs(10));

    // first tick at 10.001s: fails, backs off 4s, fails again, and the next
    // 8s backoff would overrun the 20.001s tick
    tokio::time::sleep(Duration::from_millis(20_500)).await;

    let stats = publisher.stats();
    check!(stats.cycles() == 2);
    check!(stats.retries() == 1);
    check!(stats.batches_dropped() == 1);
    check!(stats.batches_sent() == 1);
    check!(stats.cycles_skipped() == 0);
    check!(series(&sender.attempts()).len() == 3);
    publisher.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_interrupts_a_backoff() {
    let registry = tokio_registry();
    registry.counter("jobs", Tags::empty()).unwrap().increment();
    let sender = ScriptedSender::new([status(500)]);
    let publisher = Publisher::builder()
        .encoder(LineEncoder::new(1))
        .sender(sender.clone())
        .enabled(false)
        .retry_policy(RetryPolicy::default().initial_backoff(Duration::from_secs(60)))
        .build(registry);

    let in_flight = tokio::spawn({
        let publisher = publisher.clone();
        async move { publisher.publish().await }
    });
    while publisher.state() != PublisherState::BackingOff {
        tokio::task::yield_now().await;
    }
    publisher.close().await;

    let_assert!(Err(PublishError::Closed) = in_flight.await.unwrap());
    tokio::time::sleep(Duration::from_secs(300)).await;
    check!(sender.attempts().len() == 1);
    check!(publisher.is_closed());
    check!(publisher.state() == PublisherState::Idle);
    let_assert!(Err(PublishError::Closed) = publisher.publish().await);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_aborts_the_cycle_and_reports_it() {
    let registry = tokio_registry();
    registry.counter("a", Tags::empty()).unwrap().increment();
    registry.counter("b", Tags::empty()).unwrap().increment();
    let sender = ScriptedSender::new([Ok(HttpResponse {
        status: 403,
        body: "bad key".into(),
    })]);
    let errors = Arc::new(Mutex::new(vec![]));
    let encoder = LineEncoder::new(2);
    let cache = encoder.cache.clone();
    let publisher = Publisher::builder()
        .encoder(encoder)
        .sender(sender.clone())
        .enabled(false)
        .error_hook({
            let errors = errors.clone();
            move |err| errors.lock().unwrap().push(err.clone())
        })
        .build(registry);

    let_assert!(Err(PublishError::Permanent { status: 403, body }) = publisher.publish().await);
    check!(body == "bad key");
    check!(sender.attempts().len() == 1);
    check!(publisher.stats().batches_dropped() == 2);
    check!(publisher.stats().retries() == 0);
    check!(errors.lock().unwrap().len() == 1);
    // the metadata calls were never sent, so they are reserved again next time
    check!(cache.is_empty());

    let report = publisher.publish().await.unwrap();
    check!(report.batches_sent == 2);
    check!(report.metadata_sent == 2);
    check!(cache.len() == 2);
    publisher.close().await;
}

#[tokio::test(start_paused = true)]
async fn metadata_is_sent_once_per_name() {
    let registry = tokio_registry();
    registry.counter("a", Tags::of([("k", "1")])).unwrap().increment();
    registry.counter("a", Tags::of([("k", "2")])).unwrap().increment();
    let sender = RecordingSender::new();
    let publisher = Publisher::builder()
        .encoder(LineEncoder::new(1))
        .sender(sender.clone())
        .enabled(false)
        .build(registry);

    publisher.publish().await.unwrap();
    publisher.publish().await.unwrap();
    let metadata: Vec<_> = sender
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::Put)
        .collect();
    check!(metadata.len() == 1);
    check!(metadata[0].url == "http://backend/meta/a");
    // metadata goes out after the series of its cycle
    check!(sender.requests()[1].method == Method::Put);
    publisher.close().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_cycles_are_rejected() {
    let registry = tokio_registry();
    registry.counter("jobs", Tags::empty()).unwrap().increment();
    let sender = ScriptedSender::new([status(429)]);
    let publisher = Publisher::builder()
        .encoder(LineEncoder::new(1))
        .sender(sender.clone())
        .retry_policy(RetryPolicy::default().initial_backoff(Duration::from_secs(5)))
        .build(registry);

    // a manual cycle started at 9s is still backing off when the 10.001s tick fires
    tokio::time::sleep(Duration::from_secs(9)).await;
    let in_flight = tokio::spawn({
        let publisher = publisher.clone();
        async move { publisher.publish().await }
    });
    tokio::time::sleep(Duration::from_secs(3)).await;
    check!(publisher.state() == PublisherState::BackingOff);
    check!(publisher.stats().cycles_skipped() == 1);
    let_assert!(Err(PublishError::AlreadyPublishing) = publisher.publish().await);

    let report = in_flight.await.unwrap().unwrap();
    check!(report.retries == 1);
    check!(report.batches_sent == 1);
    publisher.close().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_publisher_only_publishes_on_demand() {
    let registry = tokio_registry();
    registry.counter("jobs", Tags::empty()).unwrap().increment();
    let sender = RecordingSender::new();
    let publisher = Publisher::builder()
        .encoder(LineEncoder::new(1))
        .sender(sender.clone())
        .enabled(false)
        .build(registry);
    check!(!publisher.is_enabled());

    tokio::time::sleep(Duration::from_secs(60)).await;
    check!(sender.requests().is_empty());

    publisher.publish().await.unwrap();
    check!(series(&sender.requests()).len() == 1);
    publisher.close().await;
}

#[tokio::test(start_paused = true)]
async fn unencodable_points_are_skipped_and_counted() {
    let registry = tokio_registry();
    registry.counter("jobs", Tags::empty()).unwrap().increment();
    let _gauge = registry
        .gauge("broken", Tags::empty(), || f64::INFINITY)
        .unwrap();
    let sender = RecordingSender::new();
    let publisher = Publisher::builder()
        .encoder(LineEncoder::new(1))
        .sender(sender.clone())
        .enabled(false)
        .build(registry);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let report = publisher.publish().await.unwrap();
    check!(report.points_skipped == 1);
    check!(report.batches_sent == 1);
    check!(publisher.stats().points_skipped() == 1);
    let sent = series(&sender.requests())[0].body_str().into_owned();
    check!(sent.contains("jobs"));
    check!(!sent.contains("broken"));
    publisher.close().await;
}
