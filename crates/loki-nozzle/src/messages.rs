// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Firehose envelopes and their conversion into labelled Loki lines.
//!
//! Envelopes arrive as JSON objects carrying the common origin fields plus
//! exactly one event body keyed by its kind:
//!
//! ```json
//! {"origin":"rep","deployment":"cf","job":"diego-cell","index":"0",
//!  "LogMessage":{"message":"hello","message_type":"OUT","app_id":"app-1"}}
//! ```

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error};

use crate::app_cache::MetadataCache;
use crate::errors::{CacheError, PushError};
use crate::labels::LabelSet;
use crate::push_service::PushClient;
use crate::util::{format_uuid, Uuid};

const APP_ID_LABEL: &str = "cf_app_id";

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub origin: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub index: String,
    /// Nanoseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub event: EventKind,
}

#[derive(Debug, Clone, Deserialize)]
pub enum EventKind {
    LogMessage(LogMessage),
    ValueMetric(ValueMetric),
    HttpStartStop(HttpStartStop),
    ContainerMetric(ContainerMetric),
    CounterEvent(CounterEvent),
    Error(ErrorEvent),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::LogMessage(_) => "LogMessage",
            EventKind::ValueMetric(_) => "ValueMetric",
            EventKind::HttpStartStop(_) => "HttpStartStop",
            EventKind::ContainerMetric(_) => "ContainerMetric",
            EventKind::CounterEvent(_) => "CounterEvent",
            EventKind::Error(_) => "Error",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogMessage {
    pub message: String,
    /// `OUT` or `ERR`
    pub message_type: String,
    pub app_id: Option<String>,
    pub source_type: String,
    pub source_instance: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ValueMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpStartStop {
    pub start_timestamp: i64,
    pub stop_timestamp: i64,
    pub method: String,
    pub uri: String,
    pub status_code: i32,
    pub application_id: Option<Uuid>,
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContainerMetric {
    pub application_id: String,
    pub instance_index: i32,
    pub cpu_percentage: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CounterEvent {
    pub name: String,
    pub delta: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorEvent {
    pub source: String,
    pub code: i32,
    pub message: String,
}

/// A labelled line ready for the push client.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub labels: LabelSet,
    pub message: String,
    pub timestamp: SystemTime,
}

impl From<&Envelope> for Event {
    fn from(envelope: &Envelope) -> Self {
        let mut labels = LabelSet::new();
        labels.insert("cf_origin", "firehose");
        labels.insert("deployment", envelope.deployment.as_str());
        labels.insert("event_type", envelope.event.name());
        labels.insert("job", envelope.job.as_str());
        labels.insert("job_index", envelope.index.as_str());
        labels.insert("origin", envelope.origin.as_str());

        let message = match &envelope.event {
            EventKind::LogMessage(m) => {
                if let Some(app_id) = m.app_id.as_deref().filter(|id| !id.is_empty()) {
                    labels.insert(APP_ID_LABEL, app_id);
                }
                labels.insert("message_type", m.message_type.as_str());
                labels.insert("source_instance", m.source_instance.as_str());
                labels.insert("source_type", m.source_type.as_str());
                m.message.clone()
            }
            EventKind::ValueMetric(m) => format!("{} = {} ({})", m.name, m.value, m.unit),
            EventKind::HttpStartStop(m) => {
                if let Some(app_id) = &m.application_id {
                    labels.insert(APP_ID_LABEL, format_uuid(app_id));
                }
                if let Some(instance_id) = &m.instance_id {
                    labels.insert("instance_id", instance_id.as_str());
                }
                let elapsed_ms = m.stop_timestamp.saturating_sub(m.start_timestamp) / 1_000_000;
                format!("{} {} {} ({elapsed_ms} ms)", m.status_code, m.method, m.uri)
            }
            EventKind::ContainerMetric(m) => {
                if !m.application_id.is_empty() {
                    labels.insert(APP_ID_LABEL, m.application_id.as_str());
                }
                format!(
                    "cpu_percentage={}, memory_bytes={}, disk_bytes={}",
                    m.cpu_percentage, m.memory_bytes, m.disk_bytes
                )
            }
            EventKind::CounterEvent(m) => {
                format!("{} (delta={}, total={})", m.name, m.delta, m.total)
            }
            EventKind::Error(m) => format!("{} {}: {}", m.code, m.source, m.message),
        };

        let timestamp = envelope
            .timestamp
            .and_then(|nanos| u64::try_from(nanos).ok())
            .map(|nanos| SystemTime::UNIX_EPOCH + Duration::from_nanos(nanos))
            .unwrap_or_else(SystemTime::now);

        Event {
            labels,
            message,
            timestamp,
        }
    }
}

/// Adds app, space and org names to an event carrying `cf_app_id`.
///
/// Returns `false` when the app opted out of log forwarding and the event
/// must be dropped. Lookup failures keep the event with the labels it has.
pub async fn annotate_with_app_data(cache: &MetadataCache, event: &mut Event) -> bool {
    let Some(app_guid) = event.labels.get(APP_ID_LABEL).map(str::to_string) else {
        return true;
    };

    let app = match cache.get_app(&app_guid).await {
        Ok(app) => app,
        Err(CacheError::MissingAndIgnored) => {
            debug!("Skipping app data for missing app {app_guid}");
            return true;
        }
        Err(e) => {
            error!("Encountered an error while getting app info: {e}");
            return true;
        }
    };

    if app.ignored_app {
        return false;
    }

    for (key, value) in [
        ("cf_app_name", app.name),
        ("cf_space_id", app.space_guid),
        ("cf_space_name", app.space_name),
        ("cf_org_id", app.org_guid),
        ("cf_org_name", app.org_name),
    ] {
        if !value.is_empty() {
            event.labels.insert(key, value);
        }
    }
    true
}

/// Turns envelopes into enriched Loki lines.
pub struct Nozzle {
    cache: Arc<MetadataCache>,
    client: Arc<PushClient>,
}

impl Nozzle {
    pub fn new(cache: Arc<MetadataCache>, client: Arc<PushClient>) -> Self {
        Self { cache, client }
    }

    pub async fn post_to_loki(&self, envelope: &Envelope) -> Result<(), PushError> {
        let mut event = Event::from(envelope);
        if !annotate_with_app_data(&self.cache, &mut event).await {
            debug!("Dropping {} event of opted-out app", envelope.event.name());
            return Ok(());
        }
        self.client
            .handle(event.labels, event.timestamp, event.message)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> Envelope {
        serde_json::from_str(json).expect("valid envelope")
    }

    #[test]
    fn test_log_message_labels() {
        let event = Event::from(&envelope(
            r#"{"origin":"rep","deployment":"cf","job":"diego-cell","index":"3",
                "timestamp":1700000000000000123,
                "LogMessage":{"message":"hello","message_type":"OUT","app_id":"app-1",
                              "source_type":"APP/PROC/WEB","source_instance":"0"}}"#,
        ));

        let expected: LabelSet = [
            ("cf_app_id", "app-1"),
            ("cf_origin", "firehose"),
            ("deployment", "cf"),
            ("event_type", "LogMessage"),
            ("job", "diego-cell"),
            ("job_index", "3"),
            ("message_type", "OUT"),
            ("origin", "rep"),
            ("source_instance", "0"),
            ("source_type", "APP/PROC/WEB"),
        ]
        .into_iter()
        .collect();
        assert_eq!(event.labels, expected);
        assert_eq!(event.message, "hello");
        assert_eq!(
            event.timestamp,
            SystemTime::UNIX_EPOCH + Duration::from_nanos(1_700_000_000_000_000_123)
        );
    }

    #[test]
    fn test_metric_messages() {
        let value = Event::from(&envelope(
            r#"{"origin":"gorouter","ValueMetric":{"name":"latency","value":12.5,"unit":"ms"}}"#,
        ));
        assert_eq!(value.message, "latency = 12.5 (ms)");
        assert_eq!(value.labels.get("event_type"), Some("ValueMetric"));
        assert!(!value.labels.contains_key("cf_app_id"));

        let counter = Event::from(&envelope(
            r#"{"origin":"gorouter","CounterEvent":{"name":"requests","delta":2,"total":40}}"#,
        ));
        assert_eq!(counter.message, "requests (delta=2, total=40)");

        let container = Event::from(&envelope(
            r#"{"origin":"rep","ContainerMetric":{"application_id":"app-1","cpu_percentage":0.5,
                "memory_bytes":1024,"disk_bytes":2048}}"#,
        ));
        assert_eq!(
            container.message,
            "cpu_percentage=0.5, memory_bytes=1024, disk_bytes=2048"
        );
        assert_eq!(container.labels.get("cf_app_id"), Some("app-1"));

        let error = Event::from(&envelope(
            r#"{"origin":"doppler","Error":{"source":"router","code":42,"message":"boom"}}"#,
        ));
        assert_eq!(error.message, "42 router: boom");
        assert_eq!(error.labels.get("event_type"), Some("Error"));
    }

    #[test]
    fn test_http_start_stop() {
        let event = Event::from(&envelope(
            r#"{"origin":"gorouter","HttpStartStop":{"start_timestamp":1000000000,
                "stop_timestamp":1250000000,"method":"GET","uri":"/health","status_code":200,
                "application_id":{"low":0,"high":0},"instance_id":"i-0"}}"#,
        ));
        assert_eq!(event.message, "200 GET /health (250 ms)");
        assert_eq!(
            event.labels.get("cf_app_id"),
            Some("00000000-0000-0000-0000-000000000000")
        );
        assert_eq!(event.labels.get("instance_id"), Some("i-0"));
    }

    #[test]
    fn test_http_start_stop_extreme_timestamps() {
        let event = Event::from(&envelope(&format!(
            r#"{{"origin":"gorouter","HttpStartStop":{{"start_timestamp":{},
                "stop_timestamp":{},"method":"GET","uri":"/","status_code":200}}}}"#,
            i64::MIN,
            i64::MAX
        )));
        assert_eq!(
            event.message,
            format!("200 GET / ({} ms)", i64::MAX / 1_000_000)
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = serde_json::from_str::<Envelope>(r#"{"origin":"x","Mystery":{}}"#);
        assert!(result.is_err());
    }
}
