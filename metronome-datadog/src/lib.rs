// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod config;
mod encoder;
mod registry;

pub use config::{ConfigError, DatadogConfig, DatadogConfigBuilder};
pub use encoder::{DatadogEncoder, MAX_PAYLOAD_BYTES, encode_path_segment};
pub use registry::DatadogMeterRegistry;
