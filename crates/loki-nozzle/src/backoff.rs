// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::constants::{DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES, DEFAULT_MIN_BACKOFF};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub min_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Total number of attempts, the first one included
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Tracks attempts of a single delivery and the delay before the next one.
///
/// Delays start at `min_backoff` and double after every wait, never
/// exceeding `max_backoff`. A `max_retries` of zero still allows one attempt.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
    next_delay: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let next_delay = config.min_backoff.min(config.max_backoff);
        Self {
            config,
            attempts: 0,
            next_delay,
        }
    }

    /// Whether another attempt may be started.
    pub fn ongoing(&self) -> bool {
        self.attempts < self.config.max_retries.max(1)
    }

    /// Records that an attempt is being made and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the delay to wait now and doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next_delay;
        self.next_delay = self
            .next_delay
            .checked_mul(2)
            .unwrap_or(self.config.max_backoff)
            .min(self.config.max_backoff);
        delay
    }

    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        tokio::time::sleep(delay).await;
    }
}
