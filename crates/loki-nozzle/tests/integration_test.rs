// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use loki_nozzle::{
    app_cache::{CacheConfig, MetadataCache},
    backoff::BackoffConfig,
    directory::CloudControllerClient,
    flusher::decode_push_request,
    labels::LabelSet,
    logproto::PushRequest,
    messages::{Envelope, Nozzle},
    push_service::{ClientConfig, PushClient},
};
use mockito::{Matcher, Server, ServerGuard};
use std::sync::Arc;
use std::time::Duration;

fn envelope(app_id: &str, message: &str) -> Envelope {
    serde_json::from_str(&format!(
        r#"{{"origin":"rep","deployment":"cf","job":"diego-cell","index":"0",
            "LogMessage":{{"message":"{message}","message_type":"OUT","app_id":"{app_id}",
                          "source_type":"APP/PROC/WEB","source_instance":"0"}}}}"#
    ))
    .expect("valid envelope")
}

fn cache_config(dir: &tempfile::TempDir, ignore_missing_apps: bool) -> CacheConfig {
    CacheConfig {
        path: dir.path().join("cache.db"),
        ignore_missing_apps,
        missing_app_cache_ttl: Duration::ZERO,
        app_cache_ttl: Duration::ZERO,
        org_space_cache_ttl: Duration::from_secs(3600),
        app_limits: 0,
    }
}

fn client_config(loki_url: String) -> ClientConfig {
    ClientConfig {
        url: loki_url,
        batch_wait: Duration::from_secs(3600),
        batch_size: 1024 * 1024,
        timeout: Duration::from_secs(2),
        backoff: BackoffConfig {
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            max_retries: 2,
        },
        external_labels: LabelSet::parse_base_labels("env:test").expect("base labels"),
    }
}

async fn mock_cloud_controller(server: &mut ServerGuard) {
    server
        .mock("GET", "/v2/apps")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"next_url":null,"resources":[
                {"metadata":{"guid":"app-1"},"entity":{"name":"billing","space_guid":"sp-1"}},
                {"metadata":{"guid":"app-quiet"},"entity":{"name":"quiet","space_guid":"sp-1",
                 "environment_json":{"F2S_DISABLE_LOGGING":"true"}}}
            ]}"#,
        )
        .create_async()
        .await;
    server
        .mock("GET", "/v2/spaces/sp-1")
        .with_status(200)
        .with_body(
            r#"{"metadata":{"guid":"sp-1"},"entity":{"name":"prod","organization_guid":"org-1"}}"#,
        )
        .create_async()
        .await;
    server
        .mock("GET", "/v2/organizations/org-1")
        .with_status(200)
        .with_body(r#"{"metadata":{"guid":"org-1"},"entity":{"name":"acme"}}"#)
        .create_async()
        .await;
}

fn directory(server: &ServerGuard) -> Arc<CloudControllerClient> {
    Arc::new(CloudControllerClient::new(
        reqwest::Client::new(),
        &server.url(),
        "cf-token",
    ))
}

fn single_stream(push: &PushRequest) -> Option<(LabelSet, Vec<String>)> {
    let [stream] = push.streams.as_slice() else {
        return None;
    };
    let lines = stream.entries.iter().map(|e| e.line.clone()).collect();
    Some((parse_fingerprint(&stream.labels), lines))
}

// Test payloads only carry plain values, so no unescaping is needed
fn parse_fingerprint(fingerprint: &str) -> LabelSet {
    fingerprint
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(", ")
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.trim_matches('"').to_string()))
        .collect()
}

#[tokio::test]
async fn nozzle_enriches_and_ships_app_logs() {
    let mut cc_server = Server::new_async().await;
    mock_cloud_controller(&mut cc_server).await;

    let mut loki_server = Server::new_async().await;
    let loki = loki_server
        .mock("POST", "/api/prom/push")
        .match_header("content-type", "application/x-protobuf")
        .match_request(|request| {
            let Ok(body) = request.body() else {
                return false;
            };
            let Some((labels, lines)) = decode_push_request(body).as_ref().and_then(single_stream)
            else {
                return false;
            };
            labels.get("cf_app_name") == Some("billing")
                && labels.get("cf_space_name") == Some("prod")
                && labels.get("cf_org_name") == Some("acme")
                && labels.get("env") == Some("test")
                && lines == vec!["hello".to_string(), "world".to_string()]
        })
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let cache = Arc::new(
        MetadataCache::open(cache_config(&dir, false), directory(&cc_server))
            .await
            .expect("cache"),
    );
    let client = Arc::new(
        PushClient::new(client_config(format!("{}/api/prom/push", loki_server.url())))
            .expect("client"),
    );
    let nozzle = Nozzle::new(Arc::clone(&cache), Arc::clone(&client));

    for envelope in [
        envelope("app-1", "hello"),
        envelope("app-quiet", "dropped"),
        envelope("app-1", "world"),
    ] {
        nozzle.post_to_loki(&envelope).await.expect("post");
    }

    client.stop().await;
    cache.close().await;
    loki.assert_async().await;
}

#[tokio::test]
async fn missing_app_is_looked_up_once_and_still_shipped() {
    let mut cc_server = Server::new_async().await;
    mock_cloud_controller(&mut cc_server).await;
    let ghost = cc_server
        .mock("GET", "/v2/apps/ghost")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let mut loki_server = Server::new_async().await;
    let loki = loki_server
        .mock("POST", "/api/prom/push")
        .match_request(|request| {
            let Ok(body) = request.body() else {
                return false;
            };
            decode_push_request(body)
                .as_ref()
                .and_then(single_stream)
                .is_some_and(|(labels, lines)| {
                    labels.get("cf_app_id") == Some("ghost")
                        && !labels.contains_key("cf_app_name")
                        && lines.len() == 2
                })
        })
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let cache = Arc::new(
        MetadataCache::open(cache_config(&dir, true), directory(&cc_server))
            .await
            .expect("cache"),
    );
    let client = Arc::new(
        PushClient::new(client_config(format!("{}/api/prom/push", loki_server.url())))
            .expect("client"),
    );
    let nozzle = Nozzle::new(Arc::clone(&cache), Arc::clone(&client));

    nozzle
        .post_to_loki(&envelope("ghost", "first"))
        .await
        .expect("post");
    nozzle
        .post_to_loki(&envelope("ghost", "second"))
        .await
        .expect("post");

    client.stop().await;
    cache.close().await;
    ghost.assert_async().await;
    loki.assert_async().await;
}
