// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod encoder;
mod error;
mod metadata;
mod publisher;
#[cfg(feature = "reqwest")]
mod reqwest_sender;
mod retry;
/// Rate limiting for repeated log lines.
pub mod throttle;
pub mod transport;

/// In-memory senders for tests.
///
/// Requires the `test-util` feature.
#[cfg(feature = "test-util")]
pub mod test_util;

pub use encoder::{Encoded, Encoder};
pub use error::{EncodingError, PublishError, TransportError};
pub use metadata::{MetadataCache, MetadataCall};
pub use publisher::{
    ErrorHook, PublishReport, Publisher, PublisherBuilder, PublisherState, PublisherStats,
    YouMustConfigureAnEncoder, YouMustConfigureASender,
};
#[cfg(feature = "reqwest")]
pub use reqwest_sender::ReqwestSender;
pub use retry::RetryPolicy;
pub use transport::{HttpRequest, HttpResponse, HttpSender, Method, Outcome};
