// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Name of the single redb table holding serialized apps
pub const APP_BUCKET: &str = "AppBucket";

/// How long opening the warm-start store may wait for a competing handle
pub const STORE_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable an app sets to opt out of log forwarding
pub const OPT_OUT_ENV_KEY: &str = "F2S_DISABLE_LOGGING";
pub const OPT_OUT_ENV_VALUE: &str = "true";

/// Page size used when only the most recently updated apps are listed
pub const APPS_PER_PAGE: usize = 100;

pub const PUSH_CONTENT_TYPE: &str = "application/x-protobuf";

/// Maximum number of bytes of an error response body kept for logging
pub const MAX_ERR_MSG_LEN: usize = 1024;

pub const DEFAULT_BATCH_WAIT: Duration = Duration::from_secs(1);
pub const DEFAULT_BATCH_SIZE: usize = 100 * 1024;
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u32 = 10;
