// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Builds the reqwest client shared by the push client and the directory client.
///
/// `timeout` bounds every request sent through the client; callers may still
/// set a shorter per-request timeout.
pub fn build_client(
    timeout: Duration,
    skip_ssl_validation: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .danger_accept_invalid_certs(skip_ssl_validation)
        .build()
}
