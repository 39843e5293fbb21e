// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, time::Duration};

use metronome_publish::RetryPolicy;
use thiserror::Error;
use url::Url;

/// Configuration could not be assembled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key had no value
    #[error("missing required configuration `{0}`")]
    Missing(String),
    /// A key had a value that could not be used
    #[error("invalid value `{value}` for `{key}`: {reason}")]
    Invalid {
        /// Full key
        key: String,
        /// Raw value
        value: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Settings for publishing to Datadog.
///
/// Build one with [`DatadogConfig::builder`], or read one from string
/// properties with [`DatadogConfig::from_lookup`].
#[derive(Clone)]
pub struct DatadogConfig {
    pub(crate) uri: Url,
    pub(crate) api_key: String,
    pub(crate) application_key: Option<String>,
    pub(crate) host_tag: Option<String>,
    pub(crate) enabled: bool,
    pub(crate) step: Duration,
    pub(crate) batch_size: usize,
    pub(crate) descriptions: bool,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) retry: RetryPolicy,
}

impl DatadogConfig {
    /// Default API endpoint
    pub const DEFAULT_URI: &'static str = "https://api.datadoghq.com";

    /// Start configuring with the required API key
    pub fn builder(api_key: impl Into<String>) -> DatadogConfigBuilder {
        DatadogConfigBuilder {
            uri: Self::DEFAULT_URI.to_owned(),
            api_key: api_key.into(),
            application_key: None,
            host_tag: Some("instance".to_owned()),
            enabled: true,
            step: Duration::from_secs(60),
            batch_size: 10_000,
            descriptions: true,
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    /// Read configuration from string properties named `<prefix>.<key>`.
    ///
    /// Keys are `apiKey` (required), `applicationKey`, `uri`, `hostTag`,
    /// `enabled`, `step`, `batchSize`, `descriptions`, `connectTimeout`,
    /// `readTimeout`, `maxRetries`, `initialBackoff`, `maxBackoff` and
    /// `backoffMultiplier`. Durations accept `500ms`, `10s`, `1m` or ISO-8601
    /// such as `PT10S`; a bare number is milliseconds.
    ///
    /// ```
    /// # use std::{collections::HashMap, time::Duration};
    /// # use metronome_datadog::DatadogConfig;
    /// let props = HashMap::from([
    ///     ("datadog.apiKey", "secret"),
    ///     ("datadog.step", "PT10S"),
    ///     ("datadog.enabled", "false"),
    /// ]);
    /// let config =
    ///     DatadogConfig::from_lookup("datadog", |key| props.get(key).map(|v| v.to_string()))
    ///         .unwrap();
    /// assert_eq!(config.step(), Duration::from_secs(10));
    /// assert!(!config.enabled());
    /// ```
    pub fn from_lookup(
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let props = Props { prefix, lookup };
        let api_key = props
            .get("apiKey")
            .ok_or_else(|| ConfigError::Missing(props.key("apiKey")))?;
        let mut builder = Self::builder(api_key);
        if let Some(uri) = props.get("uri") {
            builder = builder.uri(uri);
        }
        if let Some(key) = props.get("applicationKey") {
            builder = builder.application_key(key);
        }
        if let Some(tag) = props.get("hostTag") {
            builder = builder.host_tag((!tag.is_empty()).then_some(tag));
        }
        if let Some(enabled) = props.parse("enabled", parse_bool)? {
            builder = builder.enabled(enabled);
        }
        if let Some(step) = props.parse("step", parse_duration)? {
            builder = builder.step(step);
        }
        if let Some(size) = props.parse("batchSize", parse_usize)? {
            builder = builder.batch_size(size);
        }
        if let Some(descriptions) = props.parse("descriptions", parse_bool)? {
            builder = builder.descriptions(descriptions);
        }
        if let Some(timeout) = props.parse("connectTimeout", parse_duration)? {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = props.parse("readTimeout", parse_duration)? {
            builder = builder.read_timeout(timeout);
        }

        let mut retry = RetryPolicy::default();
        if let Some(retries) = props.parse("maxRetries", parse_u32)? {
            retry = retry.max_retries(retries);
        }
        if let Some(backoff) = props.parse("initialBackoff", parse_duration)? {
            retry = retry.initial_backoff(backoff);
        }
        if let Some(backoff) = props.parse("maxBackoff", parse_duration)? {
            if backoff.is_zero() {
                return Err(props.invalid("maxBackoff", "0", "must be non-zero"));
            }
            retry = retry.max_backoff(backoff);
        }
        if let Some(multiplier) = props.parse("backoffMultiplier", parse_f64)? {
            if !(multiplier.is_finite() && multiplier >= 1.0) {
                return Err(props.invalid(
                    "backoffMultiplier",
                    &multiplier.to_string(),
                    "must be finite and at least 1",
                ));
            }
            retry = retry.multiplier(multiplier);
        }
        builder.retry_policy(retry).build()
    }

    /// Base URI of the API
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// API key, sent with every request
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Application key; metadata is only registered when one is set
    pub fn application_key(&self) -> Option<&str> {
        self.application_key.as_deref()
    }

    /// Tag whose value fills the series `host` field
    pub fn host_tag(&self) -> Option<&str> {
        self.host_tag.as_deref()
    }

    /// Whether to publish on a schedule
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Step and publish interval
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Maximum series per request
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether meter descriptions are sent with metadata
    pub fn descriptions(&self) -> bool {
        self.descriptions
    }

    /// TCP connect timeout
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Whole-request timeout
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Backoff for transient failures
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl fmt::Debug for DatadogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // keys stay out of logs
        f.debug_struct("DatadogConfig")
            .field("uri", &self.uri.as_str())
            .field("application_key", &self.application_key.as_ref().map(|_| "<redacted>"))
            .field("host_tag", &self.host_tag)
            .field("enabled", &self.enabled)
            .field("step", &self.step)
            .field("batch_size", &self.batch_size)
            .field("descriptions", &self.descriptions)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Builder for [`DatadogConfig`].
#[derive(Clone)]
#[must_use]
pub struct DatadogConfigBuilder {
    uri: String,
    api_key: String,
    application_key: Option<String>,
    host_tag: Option<String>,
    enabled: bool,
    step: Duration,
    batch_size: usize,
    descriptions: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    retry: RetryPolicy,
}

impl fmt::Debug for DatadogConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatadogConfigBuilder")
            .field("uri", &self.uri)
            .field("enabled", &self.enabled)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

impl DatadogConfigBuilder {
    /// Base URI. Defaults to [`DatadogConfig::DEFAULT_URI`].
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Application key, needed for metadata registration
    pub fn application_key(mut self, key: impl Into<String>) -> Self {
        self.application_key = Some(key.into());
        self
    }

    /// Tag used as the series host. Defaults to `instance`; `None` never sets a host.
    pub fn host_tag(mut self, tag: Option<impl Into<String>>) -> Self {
        self.host_tag = tag.map(Into::into);
        self
    }

    /// Whether to publish on a schedule. Defaults to `true`.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Step and publish interval. Defaults to one minute.
    pub fn step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Maximum series per request. Defaults to 10 000.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Whether to send meter descriptions. Defaults to `true`.
    pub fn descriptions(mut self, descriptions: bool) -> Self {
        self.descriptions = descriptions;
        self
    }

    /// Defaults to one second
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Defaults to ten seconds
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Backoff for transient failures
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<DatadogConfig, ConfigError> {
        let invalid = |key: &str, value: String, reason: &str| ConfigError::Invalid {
            key: key.to_owned(),
            value,
            reason: reason.to_owned(),
        };
        if self.api_key.is_empty() {
            return Err(ConfigError::Missing("apiKey".to_owned()));
        }
        let uri =
            Url::parse(&self.uri).map_err(|e| invalid("uri", self.uri.clone(), &e.to_string()))?;
        if uri.cannot_be_a_base() || !matches!(uri.scheme(), "http" | "https") {
            return Err(invalid("uri", self.uri, "must be an http(s) base URL"));
        }
        if self.step < Duration::from_millis(1) {
            return Err(invalid("step", format!("{:?}", self.step), "must be at least 1ms"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batchSize", "0".to_owned(), "must be positive"));
        }
        Ok(DatadogConfig {
            uri,
            api_key: self.api_key,
            application_key: self.application_key.filter(|k| !k.is_empty()),
            host_tag: self.host_tag,
            enabled: self.enabled,
            step: self.step,
            batch_size: self.batch_size,
            descriptions: self.descriptions,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            retry: self.retry,
        })
    }
}

struct Props<'a, F> {
    prefix: &'a str,
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Props<'_, F> {
    fn key(&self, name: &str) -> String {
        format!("{}.{name}", self.prefix)
    }

    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&self.key(name)).map(|v| v.trim().to_owned())
    }

    fn invalid(&self, name: &str, value: &str, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            key: self.key(name),
            value: value.to_owned(),
            reason: reason.to_owned(),
        }
    }

    fn parse<T>(
        &self,
        name: &str,
        parse: fn(&str) -> Result<T, String>,
    ) -> Result<Option<T>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => parse(&value)
                .map(Some)
                .map_err(|reason| self.invalid(name, &value, &reason)),
        }
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err("expected `true` or `false`".to_owned()),
    }
}

fn parse_usize(value: &str) -> Result<usize, String> {
    value.parse().map_err(|e: std::num::ParseIntError| e.to_string())
}

fn parse_u32(value: &str) -> Result<u32, String> {
    value.parse().map_err(|e: std::num::ParseIntError| e.to_string())
}

fn parse_f64(value: &str) -> Result<f64, String> {
    value.parse().map_err(|e: std::num::ParseFloatError| e.to_string())
}

/// Parse `500ms`, `10s`, `1.5m`, `2h`, `1d`, ISO-8601 (`PT1M30S`) or a bare
/// millisecond count.
pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty duration".to_owned());
    }
    if value.starts_with(['P', 'p']) {
        return parse_iso_duration(value);
    }
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: f64 = amount
        .parse()
        .map_err(|_| format!("`{value}` does not start with a number"))?;
    let nanos_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" => 1e6,
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3_600e9,
        "d" => 86_400e9,
        other => return Err(format!("unknown duration unit `{other}`")),
    };
    from_nanos(amount * nanos_per_unit)
}

fn from_nanos(nanos: f64) -> Result<Duration, String> {
    let nanos = nanos.round();
    if !(0.0..=u64::MAX as f64).contains(&nanos) {
        return Err("duration out of range".to_owned());
    }
    Ok(Duration::from_nanos(nanos as u64))
}

fn parse_iso_duration(value: &str) -> Result<Duration, String> {
    let upper = value.to_ascii_uppercase();
    let rest = &upper[1..];
    let (days, time) = match rest.split_once('T') {
        Some((days, time)) => (days, time),
        None => (rest, ""),
    };
    let mut nanos = 0.0;
    let mut parse_part = |part: &str, units: &[(char, f64)]| -> Result<(), String> {
        let mut number = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                continue;
            }
            let Some((_, factor)) = units.iter().find(|(u, _)| *u == c) else {
                return Err(format!("unexpected `{c}` in `{value}`"));
            };
            let amount: f64 = number
                .parse()
                .map_err(|_| format!("missing number before `{c}` in `{value}`"))?;
            nanos += amount * factor;
            number.clear();
        }
        if number.is_empty() {
            Ok(())
        } else {
            Err(format!("trailing number without unit in `{value}`"))
        }
    };
    parse_part(days, &[('D', 86_400e9)])?;
    parse_part(time, &[('H', 3_600e9), ('M', 60e9), ('S', 1e9)])?;
    from_nanos(nanos)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use assert2::{check, let_assert};
    use rstest::rstest;

    use super::{ConfigError, DatadogConfig, parse_duration};

    #[rstest]
    #[case("500ms", Duration::from_millis(500))]
    #[case("10s", Duration::from_secs(10))]
    #[case("1m", Duration::from_secs(60))]
    #[case("1.5m", Duration::from_secs(90))]
    #[case("2h", Duration::from_secs(7_200))]
    #[case("1d", Duration::from_secs(86_400))]
    #[case("250", Duration::from_millis(250))]
    #[case("PT10S", Duration::from_secs(10))]
    #[case("PT1M30S", Duration::from_secs(90))]
    #[case("pt0.5s", Duration::from_millis(500))]
    #[case("P1DT1H", Duration::from_secs(90_000))]
    fn durations(#[case] input: &str, #[case] expected: Duration) {
        check!(parse_duration(input) == Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("ten seconds")]
    #[case("10 parsecs")]
    #[case("PT10")]
    #[case("PT10X")]
    fn bad_durations(#[case] input: &str) {
        check!(parse_duration(input).is_err());
    }

    #[test]
    fn defaults() {
        let config = DatadogConfig::builder("key").build().unwrap();
        check!(config.uri().as_str() == "https://api.datadoghq.com/");
        check!(config.application_key() == None);
        check!(config.host_tag() == Some("instance"));
        check!(config.enabled());
        check!(config.step() == Duration::from_secs(60));
        check!(config.batch_size() == 10_000);
        check!(config.descriptions());
        check!(config.connect_timeout() == Duration::from_secs(1));
        check!(config.read_timeout() == Duration::from_secs(10));
    }

    #[test]
    fn lookup_reads_prefixed_keys() {
        let props = HashMap::from([
            ("dd.apiKey", "k"),
            ("dd.applicationKey", "app"),
            ("dd.uri", "http://localhost:8125"),
            ("dd.hostTag", ""),
            ("dd.batchSize", "500"),
            ("dd.maxRetries", "1"),
            ("dd.readTimeout", "2s"),
        ]);
        let config =
            DatadogConfig::from_lookup("dd", |k| props.get(k).map(|v| v.to_string())).unwrap();
        check!(config.api_key() == "k");
        check!(config.application_key() == Some("app"));
        check!(config.uri().as_str() == "http://localhost:8125/");
        check!(config.host_tag() == None);
        check!(config.batch_size() == 500);
        check!(config.retry_policy().retries() == 1);
        check!(config.read_timeout() == Duration::from_secs(2));
    }

    #[test]
    fn lookup_requires_api_key() {
        let result = DatadogConfig::from_lookup("datadog", |_| None);
        check!(result.unwrap_err() == ConfigError::Missing("datadog.apiKey".to_owned()));
    }

    #[rstest]
    #[case("enabled", "maybe")]
    #[case("step", "soon")]
    #[case("batchSize", "0")]
    #[case("batchSize", "-1")]
    #[case("uri", "not a url")]
    #[case("backoffMultiplier", "0.5")]
    fn lookup_rejects_bad_values(#[case] key: &str, #[case] value: &str) {
        let full = format!("datadog.{key}");
        let result = DatadogConfig::from_lookup("datadog", |k| match k {
            "datadog.apiKey" => Some("k".to_owned()),
            k if k == full => Some(value.to_owned()),
            _ => None,
        });
        let_assert!(Err(ConfigError::Invalid { .. }) = result);
    }
}
