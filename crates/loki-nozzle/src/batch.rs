// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use crate::labels::LabelSet;
use crate::logproto::{Entry, PushRequest, Stream};

/// Pending records grouped into one stream per label-set fingerprint.
#[derive(Debug, Default)]
pub struct Batch {
    streams: HashMap<String, Stream>,
    /// Sum of the line lengths of every buffered entry
    bytes: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, labels: &LabelSet, entry: Entry) {
        self.bytes += entry.line.len();
        let fingerprint = labels.fingerprint();
        self.streams
            .entry(fingerprint)
            .or_insert_with_key(|fp| Stream {
                labels: fp.clone(),
                entries: Vec::new(),
            })
            .entries
            .push(entry);
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn entry_count(&self) -> usize {
        self.streams.values().map(|s| s.entries.len()).sum()
    }

    pub fn into_push_request(self) -> PushRequest {
        PushRequest {
            streams: self.streams.into_values().collect(),
        }
    }
}
