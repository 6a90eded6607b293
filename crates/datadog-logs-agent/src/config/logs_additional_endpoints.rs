//! Additional logs intakes that receive a best-effort copy of every payload.
//!
//! ```json
//! [
//!   {"api_key": "secondary_org_key", "Host": "agent-http-intake.logs.datadoghq.eu", "Port": 443}
//! ]
//! ```
//!
//! Settings left out (`use_ssl`, `use_compression`, `compression_level`,
//! `connection_reset_interval`) are inherited from the main endpoint when
//! the endpoints are built.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;

#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct LogsAdditionalEndpoint {
    #[serde(default)]
    pub api_key: String,
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(default)]
    pub use_ssl: Option<bool>,
    #[serde(default)]
    pub use_compression: Option<bool>,
    #[serde(default)]
    pub compression_level: Option<i32>,
    #[serde(default)]
    pub connection_reset_interval: Option<u64>,
}

/// Accepts a JSON string (environment) or an array (YAML).
///
/// Invalid input logs an error and yields no additional endpoints.
#[allow(clippy::module_name_repetitions)]
pub fn deserialize_logs_additional_endpoints<'de, D>(
    deserializer: D,
) -> Result<Vec<LogsAdditionalEndpoint>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;

    let parsed = match value {
        Value::String(s) if !s.is_empty() => serde_json::from_str(&s),
        array @ Value::Array(_) => serde_json::from_value(array),
        _ => return Ok(Vec::new()),
    };

    Ok(parsed.unwrap_or_else(|err| {
        error!("Failed to deserialize logs additional endpoints: {err}");
        vec![]
    }))
}
