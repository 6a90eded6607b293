// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname detection reported in every log payload.

use std::env;
use tracing::warn;

/// Resolves the hostname: the configured value when set, otherwise detected.
#[must_use]
pub fn resolve_hostname(configured: Option<&str>) -> String {
    match configured.map(str::trim) {
        Some(hostname) if !hostname.is_empty() => hostname.to_string(),
        _ => get_hostname(),
    }
}

/// Detects the hostname from `DD_HOSTNAME`, then `HOSTNAME`, then the
/// system, falling back to `"unknown"`.
#[must_use]
pub fn get_hostname() -> String {
    for var in ["DD_HOSTNAME", "HOSTNAME"] {
        if let Ok(hostname) = env::var(var) {
            if !hostname.is_empty() {
                return hostname;
            }
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                return hostname.to_string();
            }
        }
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
        }
    }

    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}
