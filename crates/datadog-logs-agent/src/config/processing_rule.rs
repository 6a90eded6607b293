//! Redaction and filtering rules applied to every log record.
//!
//! Rules are configured globally under `logs_config.processing_rules` or per
//! source, and are evaluated in order, global rules first:
//!
//! ```yaml
//! logs_config:
//!   processing_rules:
//!     - type: mask_sequences
//!       name: mask_credit_cards
//!       pattern: '\d{4}-\d{4}-\d{4}-\d{4}'
//!       replace_placeholder: "[CREDIT_CARD_REDACTED]"
//!     - type: exclude_at_match
//!       name: exclude_health_checks
//!       pattern: "GET /health"
//! ```
//!
//! The same list is accepted as a JSON string through
//! `DD_LOGS_CONFIG_PROCESSING_RULES`.

use regex::bytes::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use tracing::error;

use crate::config::ConfigError;

/// What a rule does with the records its pattern matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Drop the record when the pattern matches.
    ExcludeAtMatch,
    /// Drop the record when the pattern does not match.
    IncludeAtMatch,
    /// Replace every match with `replace_placeholder`.
    MaskSequences,
}

/// A processing rule as written in configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ProcessingRule {
    #[serde(rename = "type")]
    pub kind: Kind,
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub replace_placeholder: Option<String>,
}

impl ProcessingRule {
    /// Checks the rule can be compiled and carries what its kind needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidProcessingRule(
                "all processing rules must have a name".to_string(),
            ));
        }
        if self.pattern.is_empty() {
            return Err(ConfigError::InvalidProcessingRule(format!(
                "no pattern provided for rule '{}'",
                self.name
            )));
        }
        if self.kind == Kind::MaskSequences && self.replace_placeholder.is_none() {
            return Err(ConfigError::InvalidProcessingRule(format!(
                "no replace_placeholder provided for mask rule '{}'",
                self.name
            )));
        }
        Ok(())
    }

    /// Compiles the pattern into a [`Rule`] ready for evaluation.
    pub fn compile(&self) -> Result<Rule, ConfigError> {
        self.validate()?;
        let regex = Regex::new(&self.pattern).map_err(|e| {
            ConfigError::InvalidProcessingRule(format!(
                "invalid pattern for rule '{}': {e}",
                self.name
            ))
        })?;
        Ok(Rule {
            name: self.name.clone(),
            kind: self.kind,
            regex,
            placeholder: self.replace_placeholder.clone().unwrap_or_default(),
        })
    }
}

/// A compiled processing rule.
#[derive(Clone, Debug)]
pub struct Rule {
    pub name: String,
    pub kind: Kind,
    pub regex: Regex,
    pub placeholder: String,
}

/// Compiles a list of rules, skipping (and logging) the ones that are invalid.
#[must_use]
pub fn compile_rules(rules: &[ProcessingRule]) -> Vec<Rule> {
    rules
        .iter()
        .filter_map(|rule| match rule.compile() {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                error!("LOGS | Ignoring processing rule: {e:?}");
                None
            }
        })
        .collect()
}

/// Accepts either a JSON string (environment) or an array (YAML).
///
/// Invalid entries are logged and skipped, never failing the whole config.
pub fn deserialize_processing_rules<'de, D>(
    deserializer: D,
) -> Result<Option<Vec<ProcessingRule>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: JsonValue = Deserialize::deserialize(deserializer)?;

    match value {
        JsonValue::String(s) => match serde_json::from_str(&s) {
            Ok(values) => Ok(Some(values)),
            Err(e) => {
                error!("Failed to parse processing rules: {}, ignoring", e);
                Ok(None)
            }
        },
        JsonValue::Array(a) => {
            let values: Vec<ProcessingRule> = a
                .into_iter()
                .filter_map(|v| match serde_json::from_value(v) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        error!("Failed to parse processing rule: {}, ignoring", e);
                        None
                    }
                })
                .collect();
            if values.is_empty() {
                Ok(None)
            } else {
                Ok(Some(values))
            }
        }
        _ => Ok(None),
    }
}
