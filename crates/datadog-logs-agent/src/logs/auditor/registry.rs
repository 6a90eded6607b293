//! On-disk form of the auditor registry.
//!
//! The current layout (version 2):
//!
//! ```json
//! {"Version": 2, "Registry": {"file:/var/log/app.log": {
//!     "LastUpdated": "2024-05-01T10:00:00Z", "Offset": "1024", "TailingMode": "end"}}}
//! ```
//!
//! Versions 0 and 1 were written by older agents and are decoded into the
//! same [`RegistryEntry`] shape.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::logs::constants::REGISTRY_API_VERSION;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed registry: {0}")]
    Json(#[from] serde_json::Error),
    #[error("registry retrieved from disk must have a version number")]
    MissingVersion,
    #[error("unsupported registry version {0}")]
    UnsupportedVersion(i64),
    #[error("registry write did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Last confirmed position of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistryEntry {
    pub last_updated: DateTime<Utc>,
    pub offset: String,
    #[serde(default)]
    pub tailing_mode: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JsonRegistry<'a> {
    version: i64,
    registry: BTreeMap<&'a str, &'a RegistryEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionedRegistry<T> {
    #[serde(default = "HashMap::new")]
    registry: HashMap<String, T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EntryV1 {
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    last_updated: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EntryV0 {
    path: String,
    #[serde(default)]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    offset: i64,
}

/// Serializes `registry` in the current layout, keys sorted.
pub fn marshal(registry: &HashMap<String, RegistryEntry>) -> Result<Vec<u8>, RegistryError> {
    let json = JsonRegistry {
        version: REGISTRY_API_VERSION,
        registry: registry
            .iter()
            .map(|(identifier, entry)| (identifier.as_str(), entry))
            .collect(),
    };
    Ok(serde_json::to_vec(&json)?)
}

/// Decodes a registry written by any supported version.
pub fn unmarshal(bytes: &[u8]) -> Result<HashMap<String, RegistryEntry>, RegistryError> {
    let document: Value = serde_json::from_slice(bytes)?;
    let version = document
        .get("Version")
        .and_then(read_version)
        .ok_or(RegistryError::MissingVersion)?;

    match version {
        2 => Ok(serde_json::from_value::<VersionedRegistry<RegistryEntry>>(document)?.registry),
        1 => Ok(from_v1(serde_json::from_value(document)?)),
        0 => Ok(from_v0(serde_json::from_value(document)?)),
        other => Err(RegistryError::UnsupportedVersion(other)),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn read_version(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|version| version as i64))
}

fn from_v1(registry: VersionedRegistry<EntryV1>) -> HashMap<String, RegistryEntry> {
    registry
        .registry
        .into_iter()
        .filter_map(|(identifier, entry)| {
            let offset = if entry.offset > 0 {
                entry.offset.to_string()
            } else if !entry.timestamp.is_empty() {
                entry.timestamp
            } else {
                return None;
            };
            Some((
                identifier,
                RegistryEntry {
                    last_updated: entry.last_updated,
                    offset,
                    tailing_mode: String::new(),
                },
            ))
        })
        .collect()
}

fn from_v0(registry: VersionedRegistry<EntryV0>) -> HashMap<String, RegistryEntry> {
    registry
        .registry
        .into_values()
        .filter(|entry| entry.offset > 0)
        .map(|entry| {
            (
                format!("file:{}", entry.path),
                RegistryEntry {
                    last_updated: entry.timestamp,
                    offset: entry.offset.to_string(),
                    tailing_mode: String::new(),
                },
            )
        })
        .collect()
}

/// Reads and decodes the registry at `path`.
pub fn read(path: &Path) -> Result<HashMap<String, RegistryEntry>, RegistryError> {
    let bytes = fs::read(path)?;
    unmarshal(&bytes)
}

/// Replaces the registry at `path` with `registry`.
///
/// The file is written next to its destination first and renamed over it,
/// so a crash never leaves a truncated registry behind.
pub fn write(path: &Path, registry: &HashMap<String, RegistryEntry>) -> Result<(), RegistryError> {
    let bytes = marshal(registry)?;
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    let mut file = options.open(&tmp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)?;
    Ok(())
}
