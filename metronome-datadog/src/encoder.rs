// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Datadog v1 HTTP wire format.
//!
//! Series go to `POST /api/v1/series?api_key=...` as
//! `{"series":[{"metric":..,"points":[[ts,value]],"type":..,"interval":..,
//! "host":..,"tags":[..]}]}`.
//! Metadata goes to `PUT /api/v1/metrics/<name>?api_key=...&application_key=...`
//! as `{"type":..,"unit":..,"description":..}`, with the name percent-encoded
//! as a path segment.

use std::{borrow::Cow, fmt};

use metronome_core::{MeasurementSet, MeterId, MeterKind, MeterSnapshot, Statistic};
use metronome_publish::{
    Encoded, Encoder, EncodingError, HttpRequest, MetadataCache, MetadataCall, Method,
};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Serialize;
use url::form_urlencoded;

use crate::DatadogConfig;

/// Largest request body Datadog accepts for series
pub const MAX_PAYLOAD_BYTES: usize = 3_200_000;

const ENVELOPE_OPEN: &[u8] = br#"{"series":["#;
const ENVELOPE_CLOSE: &[u8] = b"]}";

/// Characters escaped in a URL path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encode a metric name for use as one URL path segment.
///
/// ```
/// assert_eq!(metronome_datadog::encode_path_segment("my.counter#abc"), "my.counter%23abc");
/// ```
pub fn encode_path_segment(name: &str) -> String {
    utf8_percent_encode(name, PATH_SEGMENT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeriesType {
    Count,
    Gauge,
}

impl SeriesType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Gauge => "gauge",
        }
    }
}

#[derive(Serialize)]
struct Series<'a> {
    metric: &'a str,
    points: [(u64, f64); 1],
    #[serde(rename = "type")]
    kind: &'static str,
    interval: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a str>,
    tags: &'a [String],
}

#[derive(Serialize)]
struct Metadata<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

/// One series a meter expands into.
struct WirePoint {
    suffix: &'static str,
    statistic: Statistic,
    kind: SeriesType,
    value: f64,
    with_unit: bool,
    bucket: Option<u64>,
}

impl WirePoint {
    fn new(suffix: &'static str, statistic: Statistic, kind: SeriesType, value: f64) -> Self {
        Self {
            suffix,
            statistic,
            kind,
            value,
            with_unit: true,
            bucket: None,
        }
    }

    fn unitless(mut self) -> Self {
        self.with_unit = false;
        self
    }
}

/// How a statistic of a meter kind appears on the wire: name suffix, series
/// type and whether the meter's base unit applies.
fn wire_shape(kind: MeterKind, statistic: Statistic) -> Option<(&'static str, SeriesType, bool)> {
    match (kind, statistic) {
        (MeterKind::Counter, Statistic::Count) => Some(("", SeriesType::Count, true)),
        (MeterKind::Gauge, Statistic::Value) => Some(("", SeriesType::Gauge, true)),
        (MeterKind::Timer | MeterKind::DistributionSummary, statistic) => match statistic {
            Statistic::Count => Some((".count", SeriesType::Count, false)),
            Statistic::Total | Statistic::TotalTime => Some((".sum", SeriesType::Count, true)),
            Statistic::Max => Some((".max", SeriesType::Gauge, true)),
            Statistic::Value => None,
        },
        _ => None,
    }
}

fn expand(meter: &MeterSnapshot) -> Vec<WirePoint> {
    let id = meter.id();
    let point = |statistic| {
        let (suffix, kind, with_unit) = wire_shape(id.kind(), statistic)?;
        let value = meter.value(statistic)?;
        let point = WirePoint::new(suffix, statistic, kind, value);
        Some(if with_unit { point } else { point.unitless() })
    };
    match id.kind() {
        MeterKind::Counter => point(Statistic::Count).into_iter().collect(),
        MeterKind::Gauge => point(Statistic::Value).into_iter().collect(),
        MeterKind::Timer | MeterKind::DistributionSummary => {
            let total_statistic = if id.kind() == MeterKind::Timer {
                Statistic::TotalTime
            } else {
                Statistic::Total
            };
            let mut points: Vec<_> = [Statistic::Count, total_statistic]
                .into_iter()
                .filter_map(point)
                .collect();
            if let (Some(count), Some(total)) =
                (meter.value(Statistic::Count), meter.value(total_statistic))
                && count > 0.0
            {
                // derived from the total
                let avg = total / count;
                points.push(WirePoint::new(".avg", total_statistic, SeriesType::Gauge, avg));
            }
            points.extend(point(Statistic::Max));
            points.extend(meter.buckets().iter().map(|bucket| WirePoint {
                bucket: Some(bucket.midpoint),
                ..WirePoint::new(
                    ".histogram",
                    Statistic::Count,
                    SeriesType::Count,
                    bucket.count as f64,
                )
                    .unitless()
            }));
            points
        }
    }
}

fn is_valid_tag_part(part: &str) -> bool {
    !part.chars().any(char::is_control)
}

fn wire_tags(id: &MeterId, metric: &str) -> Result<Vec<String>, EncodingError> {
    id.tags()
        .iter()
        .map(|tag| {
            let rendered = if tag.value().is_empty() {
                tag.key().to_owned()
            } else {
                format!("{}:{}", tag.key(), tag.value())
            };
            if is_valid_tag_part(tag.key()) && is_valid_tag_part(tag.value()) {
                Ok(rendered)
            } else {
                Err(EncodingError::InvalidTag {
                    metric: metric.to_owned(),
                    tag: rendered.escape_debug().to_string(),
                })
            }
        })
        .collect()
}

/// Encodes snapshots for the Datadog HTTP API.
///
/// Remembers every metric name it has issued a metadata registration for, so
/// each name is registered at most once for the life of the encoder. Without
/// an application key no metadata is registered at all.
pub struct DatadogEncoder {
    base: String,
    series_url: String,
    api_key: String,
    application_key: Option<String>,
    host_tag: Option<String>,
    batch_size: usize,
    descriptions: bool,
    metadata: MetadataCache,
}

impl fmt::Debug for DatadogEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatadogEncoder")
            .field("base", &self.base)
            .field("host_tag", &self.host_tag)
            .field("batch_size", &self.batch_size)
            .field("metadata", &self.metadata.len())
            .finish_non_exhaustive()
    }
}

impl DatadogEncoder {
    /// An encoder for `config`
    pub fn new(config: &DatadogConfig) -> Self {
        let base = config.uri().as_str().trim_end_matches('/').to_owned();
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("api_key", config.api_key())
            .finish();
        Self {
            series_url: format!("{base}/api/v1/series?{query}"),
            base,
            api_key: config.api_key().to_owned(),
            application_key: config.application_key().map(str::to_owned),
            host_tag: config.host_tag().map(str::to_owned),
            batch_size: config.batch_size(),
            descriptions: config.descriptions(),
            metadata: MetadataCache::new(),
        }
    }

    /// Names registered so far
    pub fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata
    }

    fn metadata_url(&self, metric: &str, application_key: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("api_key", &self.api_key)
            .append_pair("application_key", application_key)
            .finish();
        format!(
            "{}/api/v1/metrics/{}?{query}",
            self.base,
            encode_path_segment(metric)
        )
    }

    fn reserve_metadata(
        &self,
        id: &MeterId,
        metric: &str,
        kind: SeriesType,
        with_unit: bool,
    ) -> Result<Option<MetadataCall>, EncodingError> {
        let Some(application_key) = &self.application_key else {
            return Ok(None);
        };
        if self.metadata.contains(metric) {
            return Ok(None);
        }
        let unit: Option<Cow<'static, str>> = with_unit
            .then(|| id.base_unit().name())
            .filter(|unit| !unit.is_empty());
        let body = serde_json::to_vec(&Metadata {
            kind: kind.as_str(),
            unit: unit.as_deref(),
            description: id.description().filter(|_| self.descriptions),
        })
        .map_err(|e| EncodingError::Serialization(e.to_string()))?;
        let url = self.metadata_url(metric, application_key);
        let request = HttpRequest::json(Method::Put, url, body);
        Ok(MetadataCall::reserve(&self.metadata, metric, request))
    }

    fn batch(&self, entries: Vec<Vec<u8>>) -> Vec<HttpRequest> {
        let mut batches = vec![];
        let mut body = ENVELOPE_OPEN.to_vec();
        let mut in_batch = 0;
        for entry in entries {
            let full = in_batch == self.batch_size
                || body.len() + 1 + entry.len() + ENVELOPE_CLOSE.len() > MAX_PAYLOAD_BYTES;
            if in_batch > 0 && full {
                body.extend_from_slice(ENVELOPE_CLOSE);
                batches.push(HttpRequest::json(Method::Post, &self.series_url, body));
                body = ENVELOPE_OPEN.to_vec();
                in_batch = 0;
            }
            if in_batch > 0 {
                body.push(b',');
            }
            body.extend_from_slice(&entry);
            in_batch += 1;
        }
        if in_batch > 0 {
            body.extend_from_slice(ENVELOPE_CLOSE);
            batches.push(HttpRequest::json(Method::Post, &self.series_url, body));
        }
        batches
    }
}

impl Encoder for DatadogEncoder {
    fn encode(&self, set: &MeasurementSet) -> Result<Encoded, EncodingError> {
        let timestamp = set.timestamp_millis() / 1_000;
        let interval = (set.step().millis() / 1_000).max(1);
        let mut encoded = Encoded::default();
        let mut entries = vec![];

        for meter in set.meters() {
            let id = meter.id();
            let mut tags = match wire_tags(id, id.name()) {
                Ok(tags) => tags,
                Err(err) => {
                    encoded.skipped.push(err);
                    continue;
                }
            };
            let host = self
                .host_tag
                .as_deref()
                .and_then(|host_tag| id.tags().get(host_tag));

            for point in expand(meter) {
                let metric = format!("{}{}", id.name(), point.suffix);
                if !point.value.is_finite() {
                    encoded.skipped.push(EncodingError::NonFinite {
                        metric,
                        statistic: point.statistic,
                        value: point.value,
                    });
                    continue;
                }
                if let Some(midpoint) = point.bucket {
                    tags.push(format!("bucket:{midpoint}"));
                }
                let entry = serde_json::to_vec(&Series {
                    metric: &metric,
                    points: [(timestamp, point.value)],
                    kind: point.kind.as_str(),
                    interval,
                    host,
                    tags: &tags,
                });
                if point.bucket.is_some() {
                    tags.pop();
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        encoded.skipped.push(EncodingError::Serialization(e.to_string()));
                        continue;
                    }
                };
                let limit = MAX_PAYLOAD_BYTES - ENVELOPE_OPEN.len() - ENVELOPE_CLOSE.len();
                if entry.len() > limit {
                    encoded.skipped.push(EncodingError::Oversized {
                        metric,
                        size: entry.len(),
                        limit,
                    });
                    continue;
                }
                entries.push(entry);
                // on error, dropping `encoded` releases the names it already reserved
                if point.bucket.is_none()
                    && let Some(call) =
                        self.reserve_metadata(id, &metric, point.kind, point.with_unit)?
                {
                    encoded.metadata.push(call);
                }
            }
        }

        let series = entries.len();
        encoded.batches = self.batch(entries);
        tracing::debug!(
            series,
            batches = encoded.batches.len(),
            metadata = encoded.metadata.len(),
            "encoded datadog payload"
        );
        Ok(encoded)
    }

    fn metadata_call(
        &self,
        id: &MeterId,
        statistic: Statistic,
    ) -> Result<Option<MetadataCall>, EncodingError> {
        let Some((suffix, kind, with_unit)) = wire_shape(id.kind(), statistic) else {
            return Ok(None);
        };
        self.reserve_metadata(id, &format!("{}{suffix}", id.name()), kind, with_unit)
    }
}
