// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod app_cache;
pub mod app_store;
pub mod backoff;
pub mod batch;
pub mod config;
pub mod constants;
pub mod directory;
pub mod errors;
pub mod flusher;
pub mod http;
pub mod labels;
pub mod logproto;
pub mod messages;
pub mod push_service;
pub mod util;
