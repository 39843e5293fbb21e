// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use metronome_core::{MeasurementSet, MeterId, Statistic};

use crate::{EncodingError, HttpRequest, MetadataCall};

/// The requests one snapshot turns into.
#[derive(Debug, Default)]
pub struct Encoded {
    /// Data batches, each under the backend's size limit. Sent in order.
    pub batches: Vec<HttpRequest>,
    /// Metadata registrations for names not registered before. Sent after
    /// the batches; released unsent if the cycle is aborted first.
    pub metadata: Vec<MetadataCall>,
    /// Points or meters that were left out, and why
    pub skipped: Vec<EncodingError>,
}

/// Serializes snapshots into a backend's wire format.
///
/// An encoder is stateful only in which metric names it has reserved metadata
/// registrations for: a name gets at most one [`MetadataCall`] over the
/// encoder's lifetime, unless that call is released unsent.
pub trait Encoder: Send + Sync + 'static {
    /// Encode a whole snapshot, including metadata calls for new names.
    ///
    /// Per-point problems go to [`Encoded::skipped`]. An `Err` means nothing
    /// could be encoded.
    fn encode(&self, set: &MeasurementSet) -> Result<Encoded, EncodingError>;

    /// The metadata registration for one statistic of a meter, if the backend
    /// wants one and it has not been reserved yet.
    fn metadata_call(
        &self,
        id: &MeterId,
        statistic: Statistic,
    ) -> Result<Option<MetadataCall>, EncodingError>;
}
