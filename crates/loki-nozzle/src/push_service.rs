// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching Loki client.
//!
//! Producers hand records to a single worker task through a channel of
//! capacity one, so [`PushClient::handle`] waits while the worker is busy
//! sending. The worker is the only owner of the pending [`Batch`]:
//!
//! ```text
//!   PushClient::handle ──┐
//!   PushClient::handle ──┼──> channel ──> PushWorker ──> Flusher ──> Loki
//!   PushClient::handle ──┘                  (owns Batch)
//! ```

use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backoff::BackoffConfig;
use crate::batch::Batch;
use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_BATCH_WAIT, DEFAULT_PUSH_TIMEOUT};
use crate::errors::PushError;
use crate::flusher::Flusher;
use crate::http::build_client;
use crate::labels::LabelSet;
use crate::logproto::Entry;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Loki push endpoint, e.g. `http://localhost:3100/api/prom/push`
    pub url: String,
    /// Maximum time a non-empty batch waits before being sent
    pub batch_wait: Duration,
    /// Maximum sum of line lengths in one batch, in bytes
    pub batch_size: usize,
    /// Per-request timeout
    pub timeout: Duration,
    pub backoff: BackoffConfig,
    /// Labels added to every record
    pub external_labels: LabelSet,
}

impl ClientConfig {
    pub fn with_defaults(url: String, external_labels: LabelSet) -> Self {
        Self {
            url,
            batch_wait: DEFAULT_BATCH_WAIT,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_PUSH_TIMEOUT,
            backoff: BackoffConfig::default(),
            external_labels,
        }
    }
}

#[derive(Debug)]
struct PushRecord {
    labels: LabelSet,
    entry: Entry,
}

pub struct PushClient {
    tx: mpsc::Sender<PushRecord>,
    external_labels: LabelSet,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PushClient {
    /// Builds the HTTP client and spawns the batching worker. Must be called
    /// from within a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, PushError> {
        let client = build_client(config.timeout, false)?;
        let flusher = Flusher::new(
            client,
            config.url.clone(),
            config.timeout,
            config.backoff.clone(),
        );

        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let worker = PushWorker {
            rx,
            flusher,
            batch: Batch::new(),
            batch_wait: config.batch_wait,
            batch_size: config.batch_size,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Ok(Self {
            tx,
            external_labels: config.external_labels,
            cancel,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn with_defaults(url: String, external_labels: LabelSet) -> Result<Self, PushError> {
        Self::new(ClientConfig::with_defaults(url, external_labels))
    }

    /// Queues one line for the next batch.
    ///
    /// Configured external labels are merged underneath `labels`, so a
    /// per-record label wins over an external one with the same key. The
    /// call waits until the worker accepts the record.
    pub async fn handle(
        &self,
        labels: LabelSet,
        timestamp: SystemTime,
        line: String,
    ) -> Result<(), PushError> {
        let labels = if self.external_labels.is_empty() {
            labels
        } else {
            self.external_labels.merge(&labels)
        };

        self.tx
            .send(PushRecord {
                labels,
                entry: Entry::new(timestamp, line),
            })
            .await
            .map_err(|_| PushError::Stopped)
    }

    /// Flushes whatever is pending and waits for the worker to exit.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let Some(handle) = worker.take() else {
            debug!("Loki client already stopped");
            return;
        };

        info!("Loki client waiting for stop");
        self.cancel.cancel();
        if let Err(e) = handle.await {
            error!("Loki push worker failed: {e}");
        }
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct PushWorker {
    rx: mpsc::Receiver<PushRecord>,
    flusher: Flusher,
    batch: Batch,
    batch_wait: Duration,
    batch_size: usize,
    cancel: CancellationToken,
}

impl PushWorker {
    async fn run(mut self) {
        debug!("Loki push worker started");

        let mut max_wait = tokio::time::interval(self.batch_wait);
        max_wait.set_missed_tick_behavior(MissedTickBehavior::Delay);
        max_wait.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                record = self.rx.recv() => match record {
                    Some(record) => self.add(record).await,
                    None => break,
                },

                _ = max_wait.tick() => {
                    if !self.batch.is_empty() {
                        self.flush().await;
                    }
                }
            }
        }

        // Records already accepted by the channel still belong to this batch
        self.rx.close();
        while let Ok(record) = self.rx.try_recv() {
            self.add(record).await;
        }
        if !self.batch.is_empty() {
            self.flush().await;
        }

        debug!("Loki push worker stopped");
    }

    async fn add(&mut self, record: PushRecord) {
        if !self.batch.is_empty() && self.batch.bytes() + record.entry.line.len() > self.batch_size
        {
            self.flush().await;
        }
        self.batch.add(&record.labels, record.entry);
    }

    async fn flush(&mut self) {
        let batch = std::mem::take(&mut self.batch);
        self.flusher.flush(batch).await;
    }
}
