// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;
use std::time::Duration;

/// Errors raised by the persistent warm-start store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("could not acquire the store within {0:?}")]
    Timeout(Duration),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

/// Errors raised while talking to the Cloud Controller
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP status {status}")]
    Status { url: String, status: StatusCode },
    #[error("{0} not found")]
    NotFound(String),
}

/// Errors surfaced by app metadata lookups
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to open app store: {0}")]
    StoreOpen(#[source] StoreError),
    #[error("app store task failed: {0}")]
    StoreTask(#[source] tokio::task::JoinError),
    #[error("failed to fetch app metadata: {0}")]
    RemoteFetch(#[from] DirectoryError),
    #[error("app was missed and ignored")]
    MissingAndIgnored,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("failed to encode batch: {0}")]
    Encoding(#[from] snap::Error),
    #[error("push client is stopped")]
    Stopped,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("when splitting {0:?} by ':' there must be exactly 2 values")]
    InvalidPair(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0} environment variable is not set")]
    Missing(&'static str),
    #[error("invalid base labels: {0}")]
    Labels(#[from] LabelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::MissingAndIgnored;
        assert_eq!(error.to_string(), "app was missed and ignored");

        let error = CacheError::from(DirectoryError::NotFound("app app-1".to_string()));
        assert_eq!(
            error.to_string(),
            "failed to fetch app metadata: app app-1 not found"
        );

        let error = LabelError::InvalidPair("a:b:c".to_string());
        assert_eq!(
            error.to_string(),
            "when splitting \"a:b:c\" by ':' there must be exactly 2 values"
        );
    }

    #[test]
    fn test_store_timeout_display() {
        let error = StoreError::Timeout(Duration::from_secs(5));
        assert_eq!(error.to_string(), "could not acquire the store within 5s");
    }
}
