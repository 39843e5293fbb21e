// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use metronome_core::Statistic;
use thiserror::Error;

/// A request could not be sent, or no response was received.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Could not connect
    #[error("connect failed: {0}")]
    Connect(String),
    /// Connect or read timed out
    #[error("timed out: {0}")]
    Timeout(String),
    /// Anything else
    #[error("transport error: {0}")]
    Other(String),
}

/// A data point or batch could not be encoded.
///
/// Point-level errors cause the point (or meter) to be skipped; the rest of
/// the snapshot is still published.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EncodingError {
    /// NaN or infinite values have no wire representation
    #[error("{metric} {statistic} is not finite ({value})")]
    NonFinite {
        /// Wire metric name
        metric: String,
        /// Statistic of the value
        statistic: Statistic,
        /// The value
        value: f64,
    },
    /// A tag cannot be represented on the wire
    #[error("{metric} has an invalid tag `{tag}`")]
    InvalidTag {
        /// Wire metric name
        metric: String,
        /// The offending tag, rendered as `key:value`
        tag: String,
    },
    /// A single entry is larger than a whole request may be
    #[error("{metric} encodes to {size} bytes, over the {limit} byte request limit")]
    Oversized {
        /// Wire metric name
        metric: String,
        /// Encoded size
        size: usize,
        /// Request size limit
        limit: usize,
    },
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// A publish cycle failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PublishError {
    /// Transient failures outlasted the retry policy; the rest of the cycle was dropped.
    #[error("giving up after {attempts} attempts: {reason}")]
    Transient {
        /// Last failure
        reason: String,
        /// Attempts made
        attempts: u32,
    },
    /// The backend rejected the request; the rest of the cycle was dropped.
    #[error("backend rejected request with status {status}: {body}")]
    Permanent {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },
    /// The snapshot could not be encoded at all
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// Another cycle is in flight
    #[error("a publish cycle is already in progress")]
    AlreadyPublishing,
    /// The publisher was closed
    #[error("publisher is closed")]
    Closed,
}
