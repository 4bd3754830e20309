// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Loki push protocol messages.
//!
//! ```protobuf
//! message PushRequest {
//!   repeated Stream streams = 1;
//! }
//!
//! message Stream {
//!   string labels = 1;
//!   repeated Entry entries = 2;
//! }
//!
//! message Entry {
//!   google.protobuf.Timestamp timestamp = 1;
//!   string line = 2;
//! }
//! ```

use prost::Message;
use std::time::SystemTime;

#[derive(Clone, PartialEq, Message)]
pub struct PushRequest {
    #[prost(message, repeated, tag = "1")]
    pub streams: Vec<Stream>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Stream {
    /// Fingerprint of the label set shared by every entry
    #[prost(string, tag = "1")]
    pub labels: String,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<Entry>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Entry {
    #[prost(message, optional, tag = "1")]
    pub timestamp: Option<prost_types::Timestamp>,
    #[prost(string, tag = "2")]
    pub line: String,
}

impl Entry {
    pub fn new(timestamp: SystemTime, line: String) -> Self {
        Self {
            timestamp: Some(prost_types::Timestamp::from(timestamp)),
            line,
        }
    }
}
