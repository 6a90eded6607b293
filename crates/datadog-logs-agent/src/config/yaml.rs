//! YAML file-based configuration.
//!
//! Reads the logs-relevant subset of a `datadog.yaml` file:
//!
//! ```yaml
//! api_key: your_api_key_here
//! site: datadoghq.com
//! hostname: web-01
//! proxy:
//!   https: http://proxy:3128
//! logs_config:
//!   use_compression: true
//!   compression_level: 6
//!   run_path: /opt/datadog-agent/run
//!   processing_rules:
//!     - type: exclude_at_match
//!       name: exclude_health_checks
//!       pattern: "GET /health"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::{
    config::{
        deserialize_option_lossless, deserialize_optional_bool_from_anything,
        deserialize_optional_duration_from_seconds, deserialize_optional_f64,
        deserialize_optional_non_negative, deserialize_optional_string, deserialize_tags,
        log_level::LogLevel,
        logs_additional_endpoints::{
            deserialize_logs_additional_endpoints, LogsAdditionalEndpoint,
        },
        processing_rule::{deserialize_processing_rules, ProcessingRule},
        Config, ConfigError, ConfigSource,
    },
    merge_option, merge_option_to_value, merge_string, merge_vec,
};
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::Deserialize;

/// The fields of `datadog.yaml` this crate understands.
#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfig {
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub site: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub api_key: Option<String>,
    pub log_level: Option<LogLevel>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub hostname: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub ident: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub alias: Option<String>,
    #[serde(deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,

    pub proxy: ProxyConfig,
    pub logs_config: LogsConfig,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ProxyConfig {
    pub https: Option<String>,
    pub no_proxy: Option<Vec<String>>,
}

/// The `logs_config` section.
#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct LogsConfig {
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub logs_dd_url: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub api_key: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub logs_no_ssl: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub use_http: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub use_tcp: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub use_compression: Option<bool>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub compression_level: Option<i32>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub connection_reset_interval: Option<Duration>,
    #[serde(deserialize_with = "deserialize_logs_additional_endpoints")]
    pub additional_endpoints: Vec<LogsAdditionalEndpoint>,

    #[serde(deserialize_with = "deserialize_processing_rules")]
    pub processing_rules: Option<Vec<ProcessingRule>>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub expected_tags_duration: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_non_negative")]
    pub pipelines: Option<usize>,

    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub batch_wait: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_non_negative")]
    pub batch_max_concurrent_send: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_non_negative")]
    pub batch_max_size: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_non_negative")]
    pub batch_max_content_size: Option<usize>,

    #[serde(deserialize_with = "deserialize_optional_f64")]
    pub sender_backoff_base: Option<f64>,
    #[serde(deserialize_with = "deserialize_optional_f64")]
    pub sender_backoff_factor: Option<f64>,
    #[serde(deserialize_with = "deserialize_optional_f64")]
    pub sender_backoff_max: Option<f64>,

    pub run_path: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub auditor_ttl: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub stop_grace_period: Option<Duration>,
}

fn merge_config(config: &mut Config, yaml_config: &YamlConfig) {
    merge_string!(config, yaml_config, site);
    merge_string!(config, yaml_config, api_key);
    merge_option_to_value!(config, yaml_config, log_level);
    merge_option!(config, yaml_config, hostname);
    merge_string!(config, yaml_config, ident);
    merge_string!(config, yaml_config, alias);
    merge_vec!(config, yaml_config, tags);

    // Proxy
    merge_option!(config, proxy_https, yaml_config.proxy, https);
    merge_option_to_value!(config, proxy_no_proxy, yaml_config.proxy, no_proxy);

    let logs = &yaml_config.logs_config;
    merge_string!(config, logs_config_logs_dd_url, logs, logs_dd_url);
    merge_option!(config, logs_config_api_key, logs, api_key);
    merge_option_to_value!(config, logs_config_logs_no_ssl, logs, logs_no_ssl);
    merge_option_to_value!(config, logs_config_use_http, logs, use_http);
    merge_option_to_value!(config, logs_config_use_tcp, logs, use_tcp);
    merge_option_to_value!(config, logs_config_use_compression, logs, use_compression);
    merge_option_to_value!(config, logs_config_compression_level, logs, compression_level);
    merge_option_to_value!(
        config,
        logs_config_connection_reset_interval,
        logs,
        connection_reset_interval
    );
    merge_vec!(
        config,
        logs_config_additional_endpoints,
        logs,
        additional_endpoints
    );
    merge_option!(config, logs_config_processing_rules, logs, processing_rules);
    merge_option_to_value!(
        config,
        logs_config_expected_tags_duration,
        logs,
        expected_tags_duration
    );
    merge_option_to_value!(config, logs_config_pipelines, logs, pipelines);
    merge_option_to_value!(config, logs_config_batch_wait, logs, batch_wait);
    merge_option_to_value!(
        config,
        logs_config_batch_max_concurrent_send,
        logs,
        batch_max_concurrent_send
    );
    merge_option_to_value!(config, logs_config_batch_max_size, logs, batch_max_size);
    merge_option_to_value!(
        config,
        logs_config_batch_max_content_size,
        logs,
        batch_max_content_size
    );
    merge_option_to_value!(
        config,
        logs_config_sender_backoff_base,
        logs,
        sender_backoff_base
    );
    merge_option_to_value!(
        config,
        logs_config_sender_backoff_factor,
        logs,
        sender_backoff_factor
    );
    merge_option_to_value!(config, logs_config_sender_backoff_max, logs, sender_backoff_max);
    merge_option_to_value!(config, logs_config_run_path, logs, run_path);
    merge_option_to_value!(config, logs_config_auditor_ttl, logs, auditor_ttl);
    merge_option_to_value!(config, logs_config_stop_grace_period, logs, stop_grace_period);
}

#[derive(Debug, PartialEq, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfigSource {
    pub path: PathBuf,
}

impl ConfigSource for YamlConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Yaml::file(self.path.clone()));

        match figment.extract::<YamlConfig>() {
            Ok(yaml_config) => merge_config(config, &yaml_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "Failed to parse config from yaml file: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}
