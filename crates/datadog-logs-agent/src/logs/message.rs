//! Log records and where they came from.
//!
//! A [`Message`] is created by a tailer for every record it reads and lives
//! until it has been delivered (or dropped). It always carries an
//! [`Origin`], which ties the record back to its [`LogSource`] and to the
//! tailer's position, so the auditor can persist progress once the record
//! has been delivered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::processing_rule::{compile_rules, ProcessingRule, Rule};

pub const STATUS_EMERGENCY: &str = "emergency";
pub const STATUS_ALERT: &str = "alert";
pub const STATUS_CRITICAL: &str = "critical";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_WARNING: &str = "warn";
pub const STATUS_NOTICE: &str = "notice";
pub const STATUS_INFO: &str = "info";
pub const STATUS_DEBUG: &str = "debug";

/// Per-source settings, as declared by an integration.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub struct LogsConfig {
    pub kind: String,
    pub service: String,
    pub source: String,
    pub source_category: String,
    pub tags: Vec<String>,
    pub tailing_mode: String,
    pub processing_rules: Vec<ProcessingRule>,
}

/// A configured log source. Its processing rules are compiled once here.
#[derive(Debug)]
pub struct LogSource {
    pub name: String,
    pub config: LogsConfig,
    rules: Vec<Rule>,
}

impl LogSource {
    #[must_use]
    pub fn new(name: impl Into<String>, config: LogsConfig) -> Self {
        let rules = compile_rules(&config.processing_rules);
        Self {
            name: name.into(),
            config,
            rules,
        }
    }

    /// Compiled source-specific rules, evaluated after the global ones.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

/// Where a record was read from.
///
/// An empty `identifier` means the tailer has no durable position (a network
/// listener, for instance) and the auditor will not record anything for it.
#[derive(Debug, Clone)]
pub struct Origin {
    pub identifier: String,
    pub offset: String,
    pub log_source: Arc<LogSource>,
    tags: Vec<String>,
    service: String,
    source: String,
}

impl Origin {
    #[must_use]
    pub fn new(log_source: Arc<LogSource>) -> Self {
        Self {
            identifier: String::new(),
            offset: String::new(),
            log_source,
            tags: Vec::new(),
            service: String::new(),
            source: String::new(),
        }
    }

    #[must_use]
    pub fn with_position(
        log_source: Arc<LogSource>,
        identifier: impl Into<String>,
        offset: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            offset: offset.into(),
            ..Self::new(log_source)
        }
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = tags;
    }

    /// Origin tags, then `sourcecategory:<x>`, then the source's config tags.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        let config = &self.log_source.config;
        let mut tags = self.tags.clone();
        if !config.source_category.is_empty() {
            tags.push(format!("sourcecategory:{}", config.source_category));
        }
        tags.extend(config.tags.iter().cloned());
        tags
    }

    #[must_use]
    pub fn tags_to_string(&self) -> String {
        self.tags().join(",")
    }

    pub fn set_service(&mut self, service: impl Into<String>) {
        self.service = service.into();
    }

    /// The configured service when there is one, otherwise the one set by the tailer.
    #[must_use]
    pub fn service(&self) -> &str {
        let configured = &self.log_source.config.service;
        if configured.is_empty() {
            &self.service
        } else {
            configured
        }
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
    }

    /// The configured source when there is one, otherwise the one set by the tailer.
    #[must_use]
    pub fn source(&self) -> &str {
        let configured = &self.log_source.config.source;
        if configured.is_empty() {
            &self.source
        } else {
            configured
        }
    }

    #[must_use]
    pub fn tailing_mode(&self) -> &str {
        &self.log_source.config.tailing_mode
    }
}

/// A single log record.
#[derive(Debug, Clone)]
pub struct Message {
    /// Raw bytes until the processor replaces them with the encoded payload.
    pub content: Vec<u8>,
    pub origin: Origin,
    pub status: String,
    /// When the record was emitted, if the tailer knows it.
    pub timestamp: Option<DateTime<Utc>>,
    pub ingestion_timestamp: Instant,
}

impl Message {
    #[must_use]
    pub fn new(content: impl Into<Vec<u8>>, origin: Origin, status: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            origin,
            status: status.into(),
            timestamp: None,
            ingestion_timestamp: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// The record status, `info` when none was set.
    #[must_use]
    pub fn status(&self) -> &str {
        if self.status.is_empty() {
            STATUS_INFO
        } else {
            &self.status
        }
    }

    /// Time spent in the pipeline since the record was ingested.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.ingestion_timestamp.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with(config: LogsConfig) -> Arc<LogSource> {
        Arc::new(LogSource::new("test", config))
    }

    #[test]
    fn test_set_tags_empty() {
        let mut origin = Origin::new(source_with(LogsConfig::default()));
        origin.set_tags(vec![]);
        assert!(origin.tags().is_empty());
        assert_eq!(origin.tags_to_string(), "");
    }

    #[test]
    fn test_tags_with_config_tags_only() {
        let origin = Origin::new(source_with(LogsConfig {
            source: "a".to_string(),
            source_category: "b".to_string(),
            tags: vec!["c:d".to_string(), "e".to_string()],
            ..LogsConfig::default()
        }));
        assert_eq!(origin.tags(), vec!["sourcecategory:b", "c:d", "e"]);
        assert_eq!(origin.tags_to_string(), "sourcecategory:b,c:d,e");
    }

    #[test]
    fn test_set_tags_with_config_tags() {
        let mut origin = Origin::new(source_with(LogsConfig {
            source_category: "b".to_string(),
            tags: vec!["c:d".to_string(), "e".to_string()],
            ..LogsConfig::default()
        }));
        origin.set_tags(vec!["foo:bar".to_string(), "baz".to_string()]);
        assert_eq!(
            origin.tags_to_string(),
            "foo:bar,baz,sourcecategory:b,c:d,e"
        );
    }

    #[test]
    fn test_configured_source_and_service_take_precedence() {
        let mut origin = Origin::new(source_with(LogsConfig {
            source: "foo".to_string(),
            service: "svc".to_string(),
            ..LogsConfig::default()
        }));
        origin.set_source("bar");
        origin.set_service("other");
        assert_eq!(origin.source(), "foo");
        assert_eq!(origin.service(), "svc");

        let mut origin = Origin::new(source_with(LogsConfig::default()));
        assert_eq!(origin.source(), "");
        origin.set_source("bar");
        origin.set_service("other");
        assert_eq!(origin.source(), "bar");
        assert_eq!(origin.service(), "other");
    }

    #[test]
    fn test_status_defaults_to_info() {
        let origin = Origin::new(source_with(LogsConfig::default()));
        let msg = Message::new("hello", origin.clone(), "");
        assert_eq!(msg.status(), STATUS_INFO);
        let msg = Message::new("hello", origin, STATUS_ERROR);
        assert_eq!(msg.status(), "error");
    }
}
