// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::MeterKind;

/// A meter could not be registered.
///
/// Registration fails fast; recording on an already registered meter never fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordingError {
    /// The name is already bound to a different kind of meter.
    #[error("`{name}` is already registered as a {existing}, cannot register it as a {requested}")]
    KindMismatch {
        /// Meter name
        name: String,
        /// Kind it was first registered as
        existing: MeterKind,
        /// Kind of the rejected registration
        requested: MeterKind,
    },
    /// The meter name is empty or contains control characters.
    #[error("invalid meter name `{0}`")]
    InvalidName(String),
    /// A tag on the meter is malformed.
    #[error("invalid tag on `{name}`: {reason}")]
    InvalidTag {
        /// Meter name
        name: String,
        /// What is wrong with the tag
        reason: &'static str,
    },
    /// The registry has been closed.
    #[error("registry is closed")]
    Closed,
}
