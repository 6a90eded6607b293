//! HTTP client construction for the logs intake.

use core::time::Duration;
use std::error::Error;
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, error};

/// Builds a client with the given request timeout, going through `proxy`
/// when set. A proxy that cannot be parsed falls back to a direct
/// connection rather than failing.
#[must_use]
pub fn get_client(timeout: Duration, proxy: Option<&str>) -> reqwest::Client {
    match build_client_inner(timeout, proxy) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client_inner(timeout, None) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client_inner(
    timeout: Duration,
    proxy: Option<&str>,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(https_uri) = proxy {
        client = client.proxy(reqwest::Proxy::https(https_uri)?);
    }

    Ok(client.build()?)
}

/// A client that is rebuilt once `reset_interval` has elapsed since it was
/// created, so long-lived connections get re-balanced across intake hosts.
///
/// A zero interval never resets.
#[derive(Debug)]
pub struct ResetClient {
    reset_interval: Duration,
    timeout: Duration,
    proxy: Option<String>,
    current: Mutex<(reqwest::Client, Instant)>,
}

impl ResetClient {
    #[must_use]
    pub fn new(reset_interval: Duration, timeout: Duration, proxy: Option<String>) -> Self {
        let client = get_client(timeout, proxy.as_deref());
        Self {
            reset_interval,
            timeout,
            proxy,
            current: Mutex::new((client, Instant::now())),
        }
    }

    /// Returns the client to use for the next request.
    #[must_use]
    pub fn client(&self) -> reqwest::Client {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !self.reset_interval.is_zero() && current.1.elapsed() >= self.reset_interval {
            debug!(
                "Resetting HTTP client after {:?}",
                self.reset_interval
            );
            *current = (get_client(self.timeout, self.proxy.as_deref()), Instant::now());
        }
        current.0.clone()
    }

    /// When the current client was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        match self.current.lock() {
            Ok(guard) => guard.1,
            Err(poisoned) => poisoned.into_inner().1,
        }
    }
}
