// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, ops::Deref};

use metronome_clock::Clock;
use metronome_core::{StepRegistry, Tags};
use metronome_publish::{HttpSender, PublishError, PublishReport, Publisher};

use crate::{DatadogConfig, DatadogEncoder};

/// A step registry that publishes to Datadog.
///
/// Dereferences to the [`StepRegistry`], so meters register against it
/// directly:
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() {
/// use metronome_core::Counter;
/// use metronome_datadog::{DatadogConfig, DatadogMeterRegistry};
/// use metronome_clock::Clock;
///
/// let config = DatadogConfig::builder("api-key").build().unwrap();
/// let registry = DatadogMeterRegistry::new(config, Clock::System).unwrap();
/// Counter::builder("jobs.done").register(&registry).unwrap().increment();
/// registry.close().await;
/// # }
/// ```
pub struct DatadogMeterRegistry<S> {
    config: DatadogConfig,
    registry: StepRegistry,
    publisher: Publisher<DatadogEncoder, S>,
}

impl<S> fmt::Debug for DatadogMeterRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatadogMeterRegistry")
            .field("config", &self.config)
            .field("meters", &self.registry.len())
            .field("publisher", &self.publisher)
            .finish()
    }
}

#[cfg(feature = "reqwest")]
impl DatadogMeterRegistry<metronome_publish::ReqwestSender> {
    /// Publish over HTTPS with the configured timeouts.
    ///
    /// When `config` is enabled this starts the publishing task, so it must be
    /// called from within a Tokio runtime.
    pub fn new(
        config: DatadogConfig,
        clock: Clock,
    ) -> Result<Self, metronome_publish::TransportError> {
        let sender =
            metronome_publish::ReqwestSender::new(config.connect_timeout(), config.read_timeout())?;
        Ok(Self::with_sender(config, clock, sender))
    }
}

impl<S: HttpSender> DatadogMeterRegistry<S> {
    /// Publish through `sender`
    pub fn with_sender(config: DatadogConfig, clock: Clock, sender: S) -> Self {
        Self::with_common_tags(config, clock, Tags::empty(), sender)
    }

    /// Publish through `sender`, adding `common_tags` to every meter
    pub fn with_common_tags(
        config: DatadogConfig,
        clock: Clock,
        common_tags: Tags,
        sender: S,
    ) -> Self {
        let registry = StepRegistry::builder()
            .step(config.step())
            .clock(clock)
            .common_tags(common_tags)
            .build();
        let publisher = Publisher::builder()
            .encoder(DatadogEncoder::new(&config))
            .sender(sender)
            .enabled(config.enabled())
            .interval(config.step())
            .retry_policy(config.retry_policy().clone())
            .build(registry.clone());
        tracing::debug!(
            uri = %config.uri(),
            enabled = config.enabled(),
            "datadog registry started"
        );
        Self {
            config,
            registry,
            publisher,
        }
    }

    /// Publish the last completed step now, whether or not scheduled publishing
    /// is enabled.
    pub async fn publish(&self) -> Result<PublishReport, PublishError> {
        self.publisher.publish().await
    }
}

impl<S> DatadogMeterRegistry<S> {
    /// Stop publishing and reject further registrations.
    ///
    /// Unsent data is not flushed.
    pub async fn close(&self) {
        self.publisher.close().await;
        self.registry.close();
    }

    /// The configuration in use
    pub fn config(&self) -> &DatadogConfig {
        &self.config
    }

    /// The underlying registry
    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// The publisher, for statistics and state
    pub fn publisher(&self) -> &Publisher<DatadogEncoder, S> {
        &self.publisher
    }
}

impl<S> Deref for DatadogMeterRegistry<S> {
    type Target = StepRegistry;

    fn deref(&self) -> &StepRegistry {
        &self.registry
    }
}
