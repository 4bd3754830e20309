// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::app_cache::CacheConfig;
use crate::backoff::BackoffConfig;
use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_BATCH_WAIT, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES,
    DEFAULT_MIN_BACKOFF, DEFAULT_PUSH_TIMEOUT,
};
use crate::errors::ConfigError;
use crate::labels::LabelSet;
use crate::push_service::ClientConfig;
use crate::util::parse_duration;

const DEFAULT_LOKI_ENDPOINT: &str = "localhost";
const DEFAULT_LOKI_PORT: u16 = 3100;
const DEFAULT_STORE_PATH: &str = "cache.db";
const DEFAULT_ORG_SPACE_CACHE_TTL: Duration = Duration::from_secs(72 * 60 * 60);
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct Config {
    /// Cloud Controller API, e.g. `https://api.cf.example.com`
    pub api_endpoint: String,
    /// Bearer token sent to the Cloud Controller
    pub cf_token: String,
    pub skip_ssl_validation: bool,
    pub log_level: String,
    pub cache: CacheConfig,
    pub client: ClientConfig,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let api_endpoint = env::var("NOZZLE_API_ENDPOINT")
            .map_err(|_| ConfigError::Missing("NOZZLE_API_ENDPOINT"))?;
        let cf_token = env::var("NOZZLE_CF_TOKEN").unwrap_or_default();
        let skip_ssl_validation = parse_env("NOZZLE_SKIP_SSL_VALIDATION")?.unwrap_or(false);
        let log_level =
            env::var("NOZZLE_LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        // NOZZLE_LOKI_URL overrides the endpoint and port pair
        let url = match env::var("NOZZLE_LOKI_URL") {
            Ok(url) => url,
            Err(_) => {
                let endpoint = env::var("NOZZLE_LOKI_ENDPOINT")
                    .unwrap_or_else(|_| DEFAULT_LOKI_ENDPOINT.to_string());
                let port: u16 = parse_env("NOZZLE_LOKI_PORT")?.unwrap_or(DEFAULT_LOKI_PORT);
                format!("http://{endpoint}:{port}/api/prom/push")
            }
        };
        let external_labels = match env::var("NOZZLE_BASE_LABELS") {
            Ok(base_labels) => LabelSet::parse_base_labels(&base_labels)?,
            Err(_) => LabelSet::new(),
        };

        let client = ClientConfig {
            url,
            batch_wait: duration_env("NOZZLE_BATCH_WAIT")?.unwrap_or(DEFAULT_BATCH_WAIT),
            batch_size: parse_env("NOZZLE_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE),
            timeout: duration_env("NOZZLE_PUSH_TIMEOUT")?.unwrap_or(DEFAULT_PUSH_TIMEOUT),
            backoff: BackoffConfig {
                min_backoff: duration_env("NOZZLE_MIN_BACKOFF")?.unwrap_or(DEFAULT_MIN_BACKOFF),
                max_backoff: duration_env("NOZZLE_MAX_BACKOFF")?.unwrap_or(DEFAULT_MAX_BACKOFF),
                max_retries: parse_env("NOZZLE_MAX_RETRIES")?.unwrap_or(DEFAULT_MAX_RETRIES),
            },
            external_labels,
        };

        let cache = CacheConfig {
            path: env::var("NOZZLE_BOLTDB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_PATH)),
            ignore_missing_apps: parse_env("NOZZLE_IGNORE_MISSING_APPS")?.unwrap_or(false),
            missing_app_cache_ttl: duration_env("NOZZLE_MISSING_APP_CACHE_INVALIDATE_TTL")?
                .unwrap_or(Duration::ZERO),
            app_cache_ttl: duration_env("NOZZLE_APP_CACHE_INVALIDATE_TTL")?
                .unwrap_or(Duration::ZERO),
            org_space_cache_ttl: duration_env("NOZZLE_ORG_SPACE_CACHE_INVALIDATE_TTL")?
                .unwrap_or(DEFAULT_ORG_SPACE_CACHE_TTL),
            app_limits: parse_env("NOZZLE_APP_LIMITS")?.unwrap_or(0),
        };

        Ok(Config {
            api_endpoint,
            cf_token,
            skip_ssl_validation,
            log_level,
            cache,
            client,
        })
    }
}

fn parse_env<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(ConfigError::InvalidValue { key, value }),
        },
        Err(_) => Ok(None),
    }
}

fn duration_env(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(value) => match parse_duration(&value) {
            Some(duration) => Ok(Some(duration)),
            None => Err(ConfigError::InvalidValue { key, value }),
        },
        Err(_) => Ok(None),
    }
}
