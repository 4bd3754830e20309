// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use loki_nozzle::{
    app_cache::MetadataCache,
    config::Config,
    directory::CloudControllerClient,
    http::build_client,
    messages::{Envelope, Nozzle},
    push_service::PushClient,
};

const CLOUD_CONTROLLER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[tokio::main]
pub async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration, shutting down: {e}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level.to_lowercase());
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Could not parse log level in configuration: {e}");
            return;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let http_client = match build_client(CLOUD_CONTROLLER_TIMEOUT, config.skip_ssl_validation) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to build Cloud Controller client: {e}");
            return;
        }
    };
    let directory = Arc::new(CloudControllerClient::new(
        http_client,
        &config.api_endpoint,
        &config.cf_token,
    ));

    let cache = match MetadataCache::open(config.cache.clone(), directory).await {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            error!("Unable to open the app cache, shutting down: {e}");
            return;
        }
    };

    let client = match PushClient::new(config.client.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Unable to start the Loki client: {e}");
            cache.close().await;
            return;
        }
    };

    info!("Relaying envelopes to {}", config.client.url);
    let nozzle = Nozzle::new(Arc::clone(&cache), Arc::clone(&client));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match serde_json::from_str::<Envelope>(&line) {
                    Ok(envelope) => {
                        if let Err(e) = nozzle.post_to_loki(&envelope).await {
                            error!("Unable to queue envelope: {e}");
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping malformed envelope: {e}"),
                },
                Ok(None) => {
                    info!("Input closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!("Error reading envelopes: {e}");
                    break;
                }
            }
        }
    }

    client.stop().await;
    cache.close().await;
}
