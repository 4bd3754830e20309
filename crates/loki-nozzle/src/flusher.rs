// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Encoding and delivery of sealed batches to the Loki push endpoint.
//!
//! A batch is serialized as a protobuf `PushRequest`, compressed with the
//! snappy block format and POSTed in a single request. 5xx responses and
//! transport errors are retried with exponential backoff; any other non-2xx
//! status drops the batch straight away.

use prost::Message;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::batch::Batch;
use crate::constants::{MAX_ERR_MSG_LEN, PUSH_CONTENT_TYPE};
use crate::errors::PushError;
use crate::logproto::PushRequest;

#[derive(Debug, Clone)]
pub struct Flusher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    backoff: BackoffConfig,
}

/// What became of a batch handed to [`Flusher::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Delivered { attempts: u32 },
    Dropped { attempts: u32 },
}

#[derive(Debug)]
pub enum ShippingError {
    /// The endpoint could not be reached (`None`) or answered with a
    /// non-success status.
    Destination(Option<StatusCode>, String),
}

impl ShippingError {
    /// Only 5xx responses and connection-level errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ShippingError::Destination(None, _) => true,
            ShippingError::Destination(Some(status), _) => status.is_server_error(),
        }
    }
}

impl std::fmt::Display for ShippingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShippingError::Destination(Some(status), msg) => write!(f, "{status}: {msg}"),
            ShippingError::Destination(None, msg) => write!(f, "{msg}"),
        }
    }
}

impl Flusher {
    pub fn new(
        client: reqwest::Client,
        url: String,
        timeout: Duration,
        backoff: BackoffConfig,
    ) -> Self {
        Flusher {
            client,
            url,
            timeout,
            backoff,
        }
    }

    /// Encodes and ships `batch`, retrying according to the backoff policy.
    /// Failures are logged and the batch is dropped; nothing is handed back.
    pub async fn flush(&self, batch: Batch) -> FlushOutcome {
        let n_streams = batch.stream_count();
        let n_entries = batch.entry_count();

        let body = match encode_batch(batch) {
            Ok(body) => body,
            Err(e) => {
                error!("Error encoding batch, data dropped: {e}");
                return FlushOutcome::Dropped { attempts: 0 };
            }
        };

        debug!("Flushing {n_entries} entries in {n_streams} streams");

        let mut backoff = Backoff::new(self.backoff.clone());
        while backoff.ongoing() {
            let attempt = backoff.begin_attempt();
            let time = Instant::now();
            match self.send(body.clone()).await {
                Ok(()) => {
                    debug!(
                        "Successfully pushed {n_entries} entries in {} ms after {attempt} attempt(s)",
                        time.elapsed().as_millis()
                    );
                    return FlushOutcome::Delivered { attempts: attempt };
                }
                Err(e) if !e.is_retryable() => {
                    error!("Batch rejected by Loki, data dropped: {e}");
                    return FlushOutcome::Dropped { attempts: attempt };
                }
                Err(e) if backoff.ongoing() => {
                    warn!("Error sending batch (attempt {attempt}), will retry: {e}");
                    backoff.wait().await;
                }
                Err(e) => {
                    error!("Final error sending batch after {attempt} attempts: {e}");
                }
            }
        }

        FlushOutcome::Dropped {
            attempts: backoff.attempts(),
        }
    }

    async fn send(&self, body: Vec<u8>) -> Result<(), ShippingError> {
        let mut resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, PUSH_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| ShippingError::Destination(e.status(), e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        // Only the first line of a bounded prefix of the body is kept
        let mut prefix = Vec::with_capacity(MAX_ERR_MSG_LEN);
        while prefix.len() < MAX_ERR_MSG_LEN {
            match resp.chunk().await {
                Ok(Some(chunk)) => {
                    let take = chunk.len().min(MAX_ERR_MSG_LEN - prefix.len());
                    prefix.extend_from_slice(&chunk[..take]);
                }
                Ok(None) | Err(_) => break,
            }
        }
        let line = String::from_utf8_lossy(&prefix)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        Err(ShippingError::Destination(
            Some(status),
            format!("server returned HTTP status {status}: {line}"),
        ))
    }
}

/// Serializes a batch into the compressed request body.
pub fn encode_batch(batch: Batch) -> Result<Vec<u8>, PushError> {
    let request = batch.into_push_request();
    let buf = request.encode_to_vec();
    Ok(snap::raw::Encoder::new().compress_vec(&buf)?)
}

/// Inverse of [`encode_batch`], used by tests and tooling that inspect payloads.
pub fn decode_push_request(body: &[u8]) -> Option<PushRequest> {
    let decompressed = snap::raw::Decoder::new().decompress_vec(body).ok()?;
    PushRequest::decode(decompressed.as_slice()).ok()
}
