// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use assert2::check;
use httpmock::{
    Method::{POST, PUT},
    MockServer,
};
use metronome_clock::{Clock, fakes::MockClock};
use metronome_core::{BaseUnit, Counter, Tags, TimeScale, Timer};
use metronome_datadog::{DatadogConfig, DatadogMeterRegistry};
use metronome_publish::{Method, PublishError, test_util::RecordingSender};
use serde_json::Value;

fn config(uri: &str) -> DatadogConfig {
    DatadogConfig::builder("fake")
        .uri(uri)
        .application_key("fake")
        .step(Duration::from_secs(10))
        .enabled(false)
        .build()
        .unwrap()
}

#[tokio::test]
async fn metadata_path_is_encoded_and_body_is_exact() {
    let clock = MockClock::at_millis(0);
    let sender = RecordingSender::new();
    let registry = DatadogMeterRegistry::with_sender(
        config("http://localhost:1"),
        Clock::custom(clock.clone()),
        sender.clone(),
    );

    Counter::builder("my.counter#abc")
        .base_unit(BaseUnit::Time(TimeScale::Microsecond))
        .register(&registry)
        .unwrap()
        .increment_by(std::f64::consts::PI);
    clock.add(Duration::from_secs(10));
    registry.publish().await.unwrap();

    let requests = sender.take();
    check!(requests.len() == 2);
    let series: Value = serde_json::from_slice(&requests[0].body).unwrap();
    check!(requests[0].method == Method::Post);
    check!(requests[0].url == "http://localhost:1/api/v1/series?api_key=fake");
    check!(series["series"][0]["metric"] == "my.counter#abc");
    check!(series["series"][0]["points"][0][0] == 10);
    check!(series["series"][0]["points"][0][1] == std::f64::consts::PI);

    check!(requests[1].method == Method::Put);
    let metadata_url = "http://localhost:1/api/v1/metrics/my.counter%23abc";
    check!(requests[1].url == format!("{metadata_url}?api_key=fake&application_key=fake"));
    check!(requests[1].body_str() == r#"{"type":"count","unit":"microsecond"}"#);
    registry.close().await;
}

#[tokio::test]
async fn metadata_fires_once_across_tags_and_cycles() {
    let clock = MockClock::at_millis(0);
    let sender = RecordingSender::new();
    let registry = DatadogMeterRegistry::with_sender(
        config("http://localhost:1"),
        Clock::custom(clock.clone()),
        sender.clone(),
    );

    for cycle in 0..3 {
        let route = format!("/r{cycle}");
        Counter::builder("hits")
            .tags(Tags::of([("route", route)]))
            .register(&registry)
            .unwrap()
            .increment();
        clock.add(Duration::from_secs(10));
        registry.publish().await.unwrap();
    }

    let metadata: Vec<_> = sender
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::Put)
        .collect();
    check!(metadata.len() == 1);
    check!(registry.publisher().stats().metadata_sent() == 1);
    check!(registry.publisher().stats().cycles() == 3);
    registry.close().await;
}

#[tokio::test]
async fn timers_publish_in_the_base_time_unit() {
    let clock = MockClock::at_millis(0);
    let sender = RecordingSender::new();
    let registry = DatadogMeterRegistry::with_sender(
        config("http://localhost:1"),
        Clock::custom(clock.clone()),
        sender.clone(),
    );

    let timer = Timer::builder("db.query").register(&registry).unwrap();
    timer.record(Duration::from_millis(30));
    timer.record(Duration::from_millis(10));
    clock.add(Duration::from_secs(10));
    registry.publish().await.unwrap();

    let body: Value = serde_json::from_slice(&sender.requests()[0].body).unwrap();
    let values: Vec<_> = body["series"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| (s["metric"].as_str().unwrap().to_owned(), s["points"][0][1].as_f64().unwrap()))
        .collect();
    check!(
        values
            == [
                ("db.query.count".to_owned(), 2.0),
                ("db.query.sum".to_owned(), 40.0),
                ("db.query.avg".to_owned(), 20.0),
                ("db.query.max".to_owned(), 30.0),
            ]
    );
    let units: Vec<_> = sender
        .requests()
        .iter()
        .filter(|r| r.method == Method::Put)
        .map(|r| r.body_str().into_owned())
        .collect();
    check!(units[1] == r#"{"type":"count","unit":"millisecond"}"#);
    registry.close().await;
}

#[tokio::test]
async fn closed_registry_rejects_publish_and_registration() {
    let sender = RecordingSender::new();
    let registry =
        DatadogMeterRegistry::with_sender(config("http://localhost:1"), Clock::System, sender);
    registry.close().await;
    check!(registry.publish().await == Err(PublishError::Closed));
    check!(Counter::builder("late").register(&registry).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn publishes_over_http() {
    let server = MockServer::start_async().await;
    let series = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/series")
                .query_param("api_key", "fake");
            then.status(202);
        })
        .await;
    let metadata = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path_prefix("/api/v1/metrics/")
                .query_param("api_key", "fake")
                .query_param("application_key", "fake")
                .body(r#"{"type":"count","unit":"microsecond"}"#);
            then.status(200);
        })
        .await;

    let registry = DatadogMeterRegistry::new(config(&server.base_url()), Clock::System).unwrap();
    Counter::builder("my.counter#abc")
        .base_unit("microseconds")
        .register(&registry)
        .unwrap()
        .increment_by(std::f64::consts::PI);
    let report = registry.publish().await.unwrap();

    check!(report.batches_sent == 1);
    check!(report.metadata_sent == 1);
    series.assert_hits_async(1).await;
    metadata.assert_hits_async(1).await;
    registry.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_requests_surface_as_permanent_errors() {
    let server = MockServer::start_async().await;
    let series = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/series");
            then.status(403).body("forbidden");
        })
        .await;

    let registry = DatadogMeterRegistry::new(config(&server.base_url()), Clock::System).unwrap();
    Counter::builder("jobs").register(&registry).unwrap().increment();
    let result = registry.publish().await;

    check!(result == Err(PublishError::Permanent { status: 403, body: "forbidden".to_owned() }));
    series.assert_hits_async(1).await;
    registry.close().await;
}
