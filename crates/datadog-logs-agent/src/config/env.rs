//! Environment variable configuration.
//!
//! Every `DD_*` variable is lower-cased and stripped of its prefix, so
//! `DD_LOGS_CONFIG_USE_COMPRESSION=false` lands in
//! `logs_config_use_compression`. Lists (processing rules, additional
//! endpoints) are given as JSON strings.

use std::path::PathBuf;
use std::time::Duration;

use figment::{providers::Env, Figment};
use serde::Deserialize;

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

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct EnvConfig {
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

    #[serde(deserialize_with = "deserialize_optional_string")]
    pub proxy_https: Option<String>,

    #[serde(deserialize_with = "deserialize_optional_string")]
    pub logs_config_logs_dd_url: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub logs_config_api_key: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub logs_config_logs_no_ssl: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub logs_config_use_http: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub logs_config_use_tcp: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub logs_config_use_compression: Option<bool>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub logs_config_compression_level: Option<i32>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub logs_config_connection_reset_interval: Option<Duration>,
    #[serde(deserialize_with = "deserialize_logs_additional_endpoints")]
    pub logs_config_additional_endpoints: Vec<LogsAdditionalEndpoint>,

    #[serde(deserialize_with = "deserialize_processing_rules")]
    pub logs_config_processing_rules: Option<Vec<ProcessingRule>>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub logs_config_expected_tags_duration: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_non_negative")]
    pub logs_config_pipelines: Option<usize>,

    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub logs_config_batch_wait: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_non_negative")]
    pub logs_config_batch_max_concurrent_send: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_non_negative")]
    pub logs_config_batch_max_size: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_non_negative")]
    pub logs_config_batch_max_content_size: Option<usize>,

    #[serde(deserialize_with = "deserialize_optional_f64")]
    pub logs_config_sender_backoff_base: Option<f64>,
    #[serde(deserialize_with = "deserialize_optional_f64")]
    pub logs_config_sender_backoff_factor: Option<f64>,
    #[serde(deserialize_with = "deserialize_optional_f64")]
    pub logs_config_sender_backoff_max: Option<f64>,

    pub logs_config_run_path: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub logs_config_auditor_ttl: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub logs_config_stop_grace_period: Option<Duration>,
}

fn merge_config(config: &mut Config, env_config: &EnvConfig) {
    merge_string!(config, env_config, site);
    merge_string!(config, env_config, api_key);
    merge_option_to_value!(config, env_config, log_level);
    merge_option!(config, env_config, hostname);
    merge_string!(config, env_config, ident);
    merge_string!(config, env_config, alias);
    merge_vec!(config, env_config, tags);
    merge_option!(config, env_config, proxy_https);

    merge_string!(config, env_config, logs_config_logs_dd_url);
    merge_option!(config, env_config, logs_config_api_key);
    merge_option_to_value!(config, env_config, logs_config_logs_no_ssl);
    merge_option_to_value!(config, env_config, logs_config_use_http);
    merge_option_to_value!(config, env_config, logs_config_use_tcp);
    merge_option_to_value!(config, env_config, logs_config_use_compression);
    merge_option_to_value!(config, env_config, logs_config_compression_level);
    merge_option_to_value!(config, env_config, logs_config_connection_reset_interval);
    merge_vec!(config, env_config, logs_config_additional_endpoints);
    merge_option!(config, env_config, logs_config_processing_rules);
    merge_option_to_value!(config, env_config, logs_config_expected_tags_duration);
    merge_option_to_value!(config, env_config, logs_config_pipelines);
    merge_option_to_value!(config, env_config, logs_config_batch_wait);
    merge_option_to_value!(config, env_config, logs_config_batch_max_concurrent_send);
    merge_option_to_value!(config, env_config, logs_config_batch_max_size);
    merge_option_to_value!(config, env_config, logs_config_batch_max_content_size);
    merge_option_to_value!(config, env_config, logs_config_sender_backoff_base);
    merge_option_to_value!(config, env_config, logs_config_sender_backoff_factor);
    merge_option_to_value!(config, env_config, logs_config_sender_backoff_max);
    merge_option_to_value!(config, env_config, logs_config_run_path);
    merge_option_to_value!(config, env_config, logs_config_auditor_ttl);
    merge_option_to_value!(config, env_config, logs_config_stop_grace_period);
}

#[derive(Debug, PartialEq, Clone, Copy)]
#[allow(clippy::module_name_repetitions)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Env::prefixed("DD_"));

        match figment.extract::<EnvConfig>() {
            Ok(env_config) => merge_config(config, &env_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "Failed to parse config from environment variables: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}
