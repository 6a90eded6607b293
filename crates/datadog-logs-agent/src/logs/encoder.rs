//! Wire encoding of processed records.

use chrono::Utc;
use serde::Serialize;

use crate::logs::message::Message;
use crate::logs::tag::HostTagProvider;

#[derive(Debug, thiserror::Error)]
#[error("failed to encode log payload: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Turns a record and its redacted content into the bytes sent on the wire.
pub trait Encoder: Send + Sync {
    fn encode(&self, msg: &Message, redacted: &[u8]) -> Result<Vec<u8>, EncodeError>;
}

#[derive(Serialize)]
struct JsonPayload<'a> {
    message: String,
    status: &'a str,
    timestamp: i64,
    hostname: &'a str,
    service: &'a str,
    source: &'a str,
    tags: String,
    ident: &'a str,
    alias: &'a str,
}

/// Encodes one JSON object per record.
#[derive(Debug, Clone)]
pub struct JsonEncoder {
    hostname: String,
    ident: String,
    alias: String,
    host_tags: HostTagProvider,
}

impl JsonEncoder {
    #[must_use]
    pub fn new(hostname: String, ident: String, alias: String) -> Self {
        Self {
            hostname,
            ident,
            alias,
            host_tags: HostTagProvider::disabled(),
        }
    }

    /// Appends `host_tags` to the record tags while it still provides them.
    #[must_use]
    pub fn with_host_tags(mut self, host_tags: HostTagProvider) -> Self {
        self.host_tags = host_tags;
        self
    }

    fn tags(&self, msg: &Message) -> String {
        let mut tags = msg.origin.tags();
        tags.extend(self.host_tags.tags().iter().cloned());
        tags.join(",")
    }
}

impl Encoder for JsonEncoder {
    fn encode(&self, msg: &Message, redacted: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let timestamp = msg.timestamp.unwrap_or_else(Utc::now).timestamp_millis();
        let payload = JsonPayload {
            message: String::from_utf8_lossy(redacted).into_owned(),
            status: msg.status(),
            timestamp,
            hostname: &self.hostname,
            service: msg.origin.service(),
            source: msg.origin.source(),
            tags: self.tags(msg),
            ident: &self.ident,
            alias: &self.alias,
        };
        Ok(serde_json::to_vec(&payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::message::{LogSource, LogsConfig, Origin};
    use chrono::TimeZone;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_json_payload_fields() {
        let source = Arc::new(LogSource::new(
            "nginx",
            LogsConfig {
                service: "web".to_string(),
                source: "nginx".to_string(),
                tags: vec!["env:prod".to_string(), "team:edge".to_string()],
                ..LogsConfig::default()
            },
        ));
        let ts = Utc
            .timestamp_millis_opt(1_700_000_000_123)
            .single()
            .expect("valid timestamp");
        let msg = Message::new("raw", Origin::new(source), "error").with_timestamp(ts);
        let encoder = JsonEncoder::new("host-1".to_string(), "id-1".to_string(), "al".to_string());

        let bytes = encoder.encode(&msg, b"redacted").expect("encodes");
        let v: Value = serde_json::from_slice(&bytes).expect("valid json");

        assert_eq!(v["message"], "redacted");
        assert_eq!(v["status"], "error");
        assert_eq!(v["timestamp"], 1_700_000_000_123_i64);
        assert_eq!(v["hostname"], "host-1");
        assert_eq!(v["service"], "web");
        assert_eq!(v["source"], "nginx");
        assert_eq!(v["tags"], "env:prod,team:edge");
        assert_eq!(v["ident"], "id-1");
        assert_eq!(v["alias"], "al");
    }

    #[test]
    fn test_host_tags_follow_record_tags_until_deadline() {
        let source = Arc::new(LogSource::new(
            "s",
            LogsConfig {
                tags: vec!["team:edge".to_string()],
                ..LogsConfig::default()
            },
        ));
        let msg = Message::new("m", Origin::new(source), "info");
        let host_tags = vec!["env:prod".to_string()];

        let encode = |host_tags: HostTagProvider| {
            let encoder = JsonEncoder::new(String::new(), String::new(), String::new())
                .with_host_tags(host_tags);
            let bytes = encoder.encode(&msg, b"m").expect("encodes");
            serde_json::from_slice::<Value>(&bytes).expect("valid json")
        };

        let fresh = HostTagProvider::new(host_tags.clone(), Duration::from_secs(3600));
        assert_eq!(encode(fresh)["tags"], "team:edge,env:prod");

        let started = Instant::now()
            .checked_sub(Duration::from_secs(10))
            .expect("instant in the past");
        let expired = HostTagProvider::starting_at(host_tags, Duration::from_secs(5), started);
        assert_eq!(encode(expired)["tags"], "team:edge");
    }

    #[test]
    fn test_invalid_utf8_is_replaced_and_timestamp_defaults_to_now() {
        let source = Arc::new(LogSource::new("s", LogsConfig::default()));
        let msg = Message::new(vec![0xff], Origin::new(source), "");
        let encoder = JsonEncoder::new(String::new(), String::new(), String::new());

        let before = Utc::now().timestamp_millis();
        let bytes = encoder.encode(&msg, &[b'a', 0xff]).expect("encodes");
        let v: Value = serde_json::from_slice(&bytes).expect("valid json");

        assert_eq!(v["message"], "a\u{fffd}");
        assert_eq!(v["status"], "info");
        assert!(v["timestamp"].as_i64().expect("number") >= before);
    }
}
