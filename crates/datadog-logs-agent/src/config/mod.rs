//! Configuration Module
//!
//! Everything the logs pipeline needs is resolved into a single [`Config`]
//! before any component is constructed. Sources are applied in order, later
//! sources overriding earlier ones:
//!
//! 1. **Defaults** - [`Config::default`]
//! 2. **YAML file** - `datadog.yaml`, see [`yaml`]
//! 3. **Environment variables** - `DD_*`, see [`env`]
//!
//! ## Behaviors worth knowing
//!
//! - A source that fails to parse is logged and skipped; the remaining
//!   sources still apply.
//! - `logs_config.batch_wait` outside `1..=10` seconds falls back to 5s.
//! - A negative `logs_config.batch_max_concurrent_send` is treated as 0
//!   (no background concurrency).
//! - `HTTPS_PROXY` is honored when no proxy is configured, unless the site
//!   is listed in `NO_PROXY` or `proxy.no_proxy`.
//!
//! Turning a [`Config`] into transport descriptors lives in [`endpoints`].

pub mod endpoints;
pub mod env;
pub mod log_level;
pub mod logs_additional_endpoints;
pub mod processing_rule;
pub mod yaml;

use serde::{Deserialize, Deserializer};
use serde_aux::prelude::deserialize_bool_from_anything;
use serde_json::Value;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::{
    env::EnvConfigSource, log_level::LogLevel, logs_additional_endpoints::LogsAdditionalEndpoint,
    processing_rule::ProcessingRule, yaml::YamlConfigSource,
};

/// Helper macro to merge Option<String> fields to String fields
///
/// Providing one field argument will merge the value from the source config field into the config
/// field.
///
/// Providing two field arguments will merge the value from the source config field into the
/// differently named config field.
#[macro_export]
macro_rules! merge_string {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if let Some(value) = &$source.$source_field {
            $config.$config_field.clone_from(value);
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field.clone_from(value);
        }
    };
}

/// Helper macro to merge Option<T> fields where T implements Clone
#[macro_export]
macro_rules! merge_option {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if $source.$source_field.is_some() {
            $config.$config_field.clone_from(&$source.$source_field);
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if $source.$field.is_some() {
            $config.$field.clone_from(&$source.$field);
        }
    };
}

/// Helper macro to merge Option<T> fields to T fields when Option<T> is Some
#[macro_export]
macro_rules! merge_option_to_value {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if let Some(value) = &$source.$source_field {
            $config.$config_field = value.clone();
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field = value.clone();
        }
    };
}

/// Helper macro to merge `Vec` fields when `Vec` is not empty
#[macro_export]
macro_rules! merge_vec {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if !$source.$source_field.is_empty() {
            $config.$config_field.clone_from(&$source.$source_field);
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if !$source.$field.is_empty() {
            $config.$field.clone_from(&$source.$field);
        }
    };
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("invalid endpoints: {0}")]
    InvalidEndpoints(String),
    #[error("invalid processing rule: {0}")]
    InvalidProcessingRule(String),
}

#[allow(clippy::module_name_repetitions)]
pub trait ConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError>;
}

#[derive(Default)]
#[allow(clippy::module_name_repetitions)]
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    config: Config,
}

#[allow(clippy::module_name_repetitions)]
impl ConfigBuilder {
    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn build(&mut self) -> Config {
        let mut failed_sources = 0;
        for source in &self.sources {
            if let Err(e) = source.load(&mut self.config) {
                error!("Failed to load config: {:?}", e);
                failed_sources += 1;
            }
        }

        if !self.sources.is_empty() && failed_sources == self.sources.len() {
            debug!("All sources failed to load config, using default config.");
        }

        if self.config.site.is_empty() {
            self.config.site = DEFAULT_SITE.to_string();
        }

        if let Ok(https_proxy) = std::env::var("HTTPS_PROXY") {
            if self.config.proxy_https.is_none() {
                self.config.proxy_https = Some(https_proxy);
            }
        }

        if self.config.proxy_https.is_some() {
            let site_in_no_proxy = std::env::var("NO_PROXY")
                .is_ok_and(|no_proxy| no_proxy.contains(&self.config.site))
                || self
                    .config
                    .proxy_no_proxy
                    .iter()
                    .any(|no_proxy| no_proxy.contains(&self.config.site));
            if site_in_no_proxy {
                self.config.proxy_https = None;
            }
        }

        if !(MIN_BATCH_WAIT..=MAX_BATCH_WAIT).contains(&self.config.logs_config_batch_wait) {
            warn!(
                "Invalid logs_config.batch_wait {:?}, must be between {:?} and {:?}, using {:?}",
                self.config.logs_config_batch_wait,
                MIN_BATCH_WAIT,
                MAX_BATCH_WAIT,
                DEFAULT_BATCH_WAIT
            );
            self.config.logs_config_batch_wait = DEFAULT_BATCH_WAIT;
        }

        if self.config.logs_config_pipelines == 0 {
            self.config.logs_config_pipelines = crate::logs::constants::NUMBER_OF_PIPELINES;
        }

        self.config.clone()
    }
}

pub const DEFAULT_SITE: &str = "datadoghq.com";
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 6;
pub const DEFAULT_BATCH_WAIT: Duration = Duration::from_secs(5);
pub const MIN_BATCH_WAIT: Duration = Duration::from_secs(1);
pub const MAX_BATCH_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_MAX_SIZE: usize = 100;
pub const DEFAULT_BATCH_MAX_CONTENT_SIZE: usize = 1_000_000;
pub const DEFAULT_AUDITOR_TTL: Duration = Duration::from_secs(23 * 60 * 60);
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_RUN_PATH: &str = "/opt/datadog-agent/run";

#[derive(Debug, PartialEq, Clone)]
#[allow(clippy::module_name_repetitions)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    pub site: String,
    pub api_key: String,
    pub log_level: LogLevel,
    pub hostname: Option<String>,

    // Agent identity reported on every payload
    pub ident: String,
    pub alias: String,
    /// Host tags, reported on every record for `logs_config_expected_tags_duration` after start
    pub tags: Vec<String>,

    // Proxy
    pub proxy_https: Option<String>,
    pub proxy_no_proxy: Vec<String>,

    // Transport
    pub logs_config_logs_dd_url: String,
    pub logs_config_api_key: Option<String>,
    pub logs_config_logs_no_ssl: bool,
    pub logs_config_use_http: bool,
    pub logs_config_use_tcp: bool,
    pub logs_config_use_compression: bool,
    pub logs_config_compression_level: i32,
    pub logs_config_connection_reset_interval: Duration,
    pub logs_config_additional_endpoints: Vec<LogsAdditionalEndpoint>,

    // Processing
    pub logs_config_processing_rules: Option<Vec<ProcessingRule>>,
    pub logs_config_expected_tags_duration: Duration,
    pub logs_config_pipelines: usize,

    // Batching, consumed by the additional destinations' background sends
    pub logs_config_batch_wait: Duration,
    pub logs_config_batch_max_concurrent_send: usize,
    pub logs_config_batch_max_size: usize,
    pub logs_config_batch_max_content_size: usize,

    // Main destination retry backoff, in seconds
    pub logs_config_sender_backoff_base: f64,
    pub logs_config_sender_backoff_factor: f64,
    pub logs_config_sender_backoff_max: f64,

    // Auditor and lifecycle
    pub logs_config_run_path: PathBuf,
    pub logs_config_auditor_ttl: Duration,
    pub logs_config_stop_grace_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site: String::default(),
            api_key: String::default(),
            log_level: LogLevel::default(),
            hostname: None,
            ident: String::default(),
            alias: String::default(),
            tags: vec![],
            proxy_https: None,
            proxy_no_proxy: vec![],
            logs_config_logs_dd_url: String::default(),
            logs_config_api_key: None,
            logs_config_logs_no_ssl: false,
            logs_config_use_http: false,
            logs_config_use_tcp: false,
            logs_config_use_compression: true,
            logs_config_compression_level: DEFAULT_COMPRESSION_LEVEL,
            logs_config_connection_reset_interval: Duration::ZERO,
            logs_config_additional_endpoints: vec![],
            logs_config_processing_rules: None,
            logs_config_expected_tags_duration: Duration::ZERO,
            logs_config_pipelines: crate::logs::constants::NUMBER_OF_PIPELINES,
            logs_config_batch_wait: DEFAULT_BATCH_WAIT,
            logs_config_batch_max_concurrent_send: 0,
            logs_config_batch_max_size: DEFAULT_BATCH_MAX_SIZE,
            logs_config_batch_max_content_size: DEFAULT_BATCH_MAX_CONTENT_SIZE,
            logs_config_sender_backoff_base: 1.0,
            logs_config_sender_backoff_factor: 2.0,
            logs_config_sender_backoff_max: 120.0,
            logs_config_run_path: PathBuf::from(DEFAULT_RUN_PATH),
            logs_config_auditor_ttl: DEFAULT_AUDITOR_TTL,
            logs_config_stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
        }
    }
}

impl Config {
    /// API key used for logs: `logs_config.api_key` when set, the global key otherwise.
    #[must_use]
    pub fn logs_api_key(&self) -> &str {
        match &self.logs_config_api_key {
            Some(key) if !key.is_empty() => key,
            _ => &self.api_key,
        }
    }
}

/// Loads `datadog.yaml` from `config_directory`, then applies `DD_*` overrides.
#[allow(clippy::module_name_repetitions)]
#[inline]
#[must_use]
pub fn get_config(config_directory: &Path) -> Config {
    let path: PathBuf = config_directory.join("datadog.yaml");
    ConfigBuilder::default()
        .add_source(Box::new(YamlConfigSource { path }))
        .add_source(Box::new(EnvConfigSource))
        .build()
}

pub fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        Value::Null => Ok(None),
        other => {
            error!(
                "Failed to parse value, expected a string, got: {}, ignoring",
                other
            );
            Ok(None)
        }
    }
}

pub fn deserialize_optional_bool_from_anything<'de, D>(
    deserializer: D,
) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<serde_json::Value> = Option::deserialize(deserializer)?;

    match opt {
        None => Ok(None),
        Some(value) => match deserialize_bool_from_anything(value) {
            Ok(bool_result) => Ok(Some(bool_result)),
            Err(e) => {
                error!("Failed to parse bool value: {}, ignoring", e);
                Ok(None)
            }
        },
    }
}

pub fn deserialize_option_lossless<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<T>::deserialize(deserializer) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to deserialize optional value: {}, ignoring", e);
            Ok(None)
        }
    }
}

/// Reads a signed count, clamping negative values to zero.
pub fn deserialize_optional_non_negative<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<i64> = deserialize_option_lossless(deserializer)?;
    Ok(value.map(|v| usize::try_from(v).unwrap_or(0)))
}

/// Reads a float, logging and ignoring anything else.
pub fn deserialize_optional_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                error!("Failed to parse float value '{s}': {e}, ignoring");
                Ok(None)
            }
        },
        Some(other) => {
            error!("Failed to parse value, expected a number, got: {other}, ignoring");
            Ok(None)
        }
    }
}

/// Reads tags given either as a list or as one string separated by commas or spaces.
pub fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let tags = match Value::deserialize(deserializer)? {
        Value::Null => vec![],
        Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::to_string)
            .collect(),
        Value::Array(values) => values
            .into_iter()
            .filter_map(|value| match value {
                Value::String(tag) => Some(tag),
                other => {
                    error!("Failed to parse tag, expected a string, got: {other}, ignoring");
                    None
                }
            })
            .collect(),
        other => {
            error!("Failed to parse tags, expected a list or a string, got: {other}, ignoring");
            vec![]
        }
    };
    Ok(tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect())
}

pub fn deserialize_optional_duration_from_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    struct DurationVisitor;
    impl<'de> serde::de::Visitor<'de> for DurationVisitor {
        type Value = Option<Duration>;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a duration in seconds (integer or float)")
        }
        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_secs(v)))
        }
        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
            match u64::try_from(v) {
                Ok(v) => self.visit_u64(v),
                Err(_) => {
                    error!(
                        "Failed to parse duration: negative durations are not allowed, ignoring"
                    );
                    Ok(None)
                }
            }
        }
        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
            if v < 0f64 || !v.is_finite() {
                error!("Failed to parse duration: {v} is not a valid duration, ignoring");
                return Ok(None);
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            match v.trim().parse::<f64>() {
                Ok(secs) => self.visit_f64(secs),
                Err(e) => {
                    error!("Failed to parse duration '{v}': {e}, ignoring");
                    Ok(None)
                }
            }
        }
        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(DurationVisitor)
        }
    }
    deserializer.deserialize_any(DurationVisitor)
}
