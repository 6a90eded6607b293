//! Resolution of the configuration into concrete network targets.
//!
//! The transport is chosen once, before the pipelines are built:
//!
//! ```text
//!   logs_config.use_http ──yes──> HTTP
//!          │no
//!   logs_config.use_tcp ───yes──> TCP
//!          │no
//!   connectivity probe ────ok───> HTTP
//!          │failed
//!          └────────────────────> TCP
//! ```

use std::time::Duration;

use tracing::warn;

use crate::config::{logs_additional_endpoints::LogsAdditionalEndpoint, Config, ConfigError};

const HTTP_INTAKE_PREFIX: &str = "agent-http-intake.logs.";
const TCP_INTAKE_PREFIX: &str = "agent-intake.logs.";
const DEFAULT_HTTPS_PORT: u16 = 443;
const DEFAULT_TCP_PORT: u16 = 10516;

/// One network target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub api_key: String,
    pub host: String,
    /// `0` means "scheme default".
    pub port: u16,
    pub use_ssl: bool,
    pub use_compression: bool,
    pub compression_level: i32,
    pub proxy_address: Option<String>,
    /// `Duration::ZERO` disables periodic connection resets.
    pub connection_reset_interval: Duration,
}

impl Endpoint {
    /// `host` or `host:port` when a port is set.
    #[must_use]
    pub fn address(&self) -> String {
        if self.port == 0 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// The main endpoint, the best-effort additional ones and the knobs shared
/// by every destination built from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub main: Endpoint,
    pub additionals: Vec<Endpoint>,
    pub use_http: bool,
    pub batch_wait: Duration,
    pub batch_max_concurrent_send: usize,
    pub batch_max_size: usize,
    pub batch_max_content_size: usize,
}

/// Outcome of the HTTP connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpConnectivity {
    Success,
    Failure,
}

/// Whether the transport still has to be decided by probing HTTP.
#[must_use]
pub fn needs_connectivity_probe(config: &Config) -> bool {
    !config.logs_config_use_http && !config.logs_config_use_tcp
}

pub fn build_endpoints(
    config: &Config,
    connectivity: HttpConnectivity,
) -> Result<Endpoints, ConfigError> {
    if config.logs_config_use_http {
        return build_http_endpoints(config);
    }
    if !config.logs_config_use_tcp && connectivity == HttpConnectivity::Success {
        return build_http_endpoints(config);
    }
    warn!(
        "LOGS | Sending logs through TCP (either logs_config.use_tcp is set or the HTTP \
         connectivity test has failed). Compressed HTTPS is the recommended transport."
    );
    build_tcp_endpoints(config)
}

pub fn build_http_endpoints(config: &Config) -> Result<Endpoints, ConfigError> {
    let default_host = format!("{HTTP_INTAKE_PREFIX}{}", config.site);
    let mut main = main_endpoint(config, &default_host, DEFAULT_HTTPS_PORT)?;
    main.use_compression = config.logs_config_use_compression;
    main.compression_level = config.logs_config_compression_level;
    main.proxy_address.clone_from(&config.proxy_https);

    let additionals = additional_endpoints(&main, &config.logs_config_additional_endpoints);
    Ok(Endpoints {
        main,
        additionals,
        use_http: true,
        batch_wait: config.logs_config_batch_wait,
        batch_max_concurrent_send: config.logs_config_batch_max_concurrent_send,
        batch_max_size: config.logs_config_batch_max_size,
        batch_max_content_size: config.logs_config_batch_max_content_size,
    })
}

pub fn build_tcp_endpoints(config: &Config) -> Result<Endpoints, ConfigError> {
    let default_host = format!("{TCP_INTAKE_PREFIX}{}", config.site);
    let default_port = if config.site.ends_with(".eu") {
        DEFAULT_HTTPS_PORT
    } else {
        DEFAULT_TCP_PORT
    };
    let mut main = main_endpoint(config, &default_host, default_port)?;
    // Compression is an HTTP content encoding.
    main.use_compression = false;

    let additionals = additional_endpoints(&main, &config.logs_config_additional_endpoints)
        .into_iter()
        .map(|mut endpoint| {
            endpoint.use_compression = false;
            endpoint
        })
        .collect();
    Ok(Endpoints {
        main,
        additionals,
        use_http: false,
        batch_wait: config.logs_config_batch_wait,
        batch_max_concurrent_send: config.logs_config_batch_max_concurrent_send,
        batch_max_size: config.logs_config_batch_max_size,
        batch_max_content_size: config.logs_config_batch_max_content_size,
    })
}

fn main_endpoint(
    config: &Config,
    default_host: &str,
    default_port: u16,
) -> Result<Endpoint, ConfigError> {
    let api_key = config.logs_api_key().trim().to_string();
    if api_key.is_empty() {
        return Err(ConfigError::InvalidEndpoints(
            "an API key is required to send logs".to_string(),
        ));
    }

    let mut use_ssl = !config.logs_config_logs_no_ssl;
    let (host, port) = if config.logs_config_logs_dd_url.trim().is_empty() {
        (default_host.to_string(), default_port)
    } else {
        let (scheme, host, port) = parse_address(&config.logs_config_logs_dd_url)?;
        match scheme {
            Some("http") => use_ssl = false,
            Some("https") => use_ssl = true,
            _ => (),
        }
        (host, port.unwrap_or(default_port))
    };

    Ok(Endpoint {
        api_key,
        host,
        port,
        use_ssl,
        use_compression: false,
        compression_level: config.logs_config_compression_level,
        proxy_address: None,
        connection_reset_interval: config.logs_config_connection_reset_interval,
    })
}

fn additional_endpoints(main: &Endpoint, configured: &[LogsAdditionalEndpoint]) -> Vec<Endpoint> {
    configured
        .iter()
        .map(|additional| Endpoint {
            api_key: if additional.api_key.trim().is_empty() {
                main.api_key.clone()
            } else {
                additional.api_key.trim().to_string()
            },
            host: additional.host.clone(),
            port: additional.port,
            use_ssl: additional.use_ssl.unwrap_or(main.use_ssl),
            use_compression: additional.use_compression.unwrap_or(main.use_compression),
            compression_level: additional
                .compression_level
                .unwrap_or(main.compression_level),
            proxy_address: main.proxy_address.clone(),
            connection_reset_interval: additional
                .connection_reset_interval
                .map_or(main.connection_reset_interval, Duration::from_secs),
        })
        .collect()
}

/// Splits `[scheme://]host[:port][/...]`.
fn parse_address(address: &str) -> Result<(Option<&str>, String, Option<u16>), ConfigError> {
    let address = address.trim();
    let (scheme, rest) = match address.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, address),
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(ConfigError::InvalidEndpoints(format!(
            "could not parse logs_dd_url '{address}': missing host"
        )));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|e| {
                ConfigError::InvalidEndpoints(format!(
                    "could not parse logs_dd_url '{address}': invalid port: {e}"
                ))
            })?;
            Ok((scheme, host.to_string(), Some(port)))
        }
        Some(_) => Err(ConfigError::InvalidEndpoints(format!(
            "could not parse logs_dd_url '{address}': missing host"
        ))),
        None => Ok((scheme, authority.to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        Config {
            api_key: "test-api-key".to_string(),
            site: "datadoghq.com".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_http_endpoint() {
        let endpoints = build_http_endpoints(&create_test_config()).expect("valid");
        assert!(endpoints.use_http);
        assert_eq!(endpoints.main.host, "agent-http-intake.logs.datadoghq.com");
        assert_eq!(endpoints.main.port, 443);
        assert!(endpoints.main.use_ssl);
        assert!(endpoints.main.use_compression);
        assert_eq!(endpoints.main.compression_level, 6);
    }

    #[test]
    fn test_default_tcp_endpoint() {
        let endpoints = build_tcp_endpoints(&create_test_config()).expect("valid");
        assert!(!endpoints.use_http);
        assert_eq!(endpoints.main.host, "agent-intake.logs.datadoghq.com");
        assert_eq!(endpoints.main.port, 10516);
        assert!(!endpoints.main.use_compression);
    }

    #[test]
    fn test_logs_dd_url_with_http_scheme_disables_ssl() {
        let config = Config {
            logs_config_logs_dd_url: "http://127.0.0.1:8080".to_string(),
            ..create_test_config()
        };
        let endpoints = build_http_endpoints(&config).expect("valid");
        assert_eq!(endpoints.main.host, "127.0.0.1");
        assert_eq!(endpoints.main.port, 8080);
        assert!(!endpoints.main.use_ssl);
    }

    #[test]
    fn test_logs_no_ssl() {
        let config = Config {
            logs_config_logs_dd_url: "intake.local:10514".to_string(),
            logs_config_logs_no_ssl: true,
            ..create_test_config()
        };
        let endpoints = build_tcp_endpoints(&config).expect("valid");
        assert_eq!(endpoints.main.address(), "intake.local:10514");
        assert!(!endpoints.main.use_ssl);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let config = Config {
            logs_config_logs_dd_url: "intake.local:notaport".to_string(),
            ..create_test_config()
        };
        assert!(matches!(
            build_http_endpoints(&config),
            Err(ConfigError::InvalidEndpoints(_))
        ));
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let config = Config::default();
        assert!(matches!(
            build_http_endpoints(&config),
            Err(ConfigError::InvalidEndpoints(_))
        ));
    }

    #[test]
    fn test_additional_endpoints_inherit_from_main() {
        let config = Config {
            logs_config_connection_reset_interval: Duration::from_secs(30),
            logs_config_additional_endpoints: vec![LogsAdditionalEndpoint {
                api_key: String::new(),
                host: "backup.example.com".to_string(),
                port: 443,
                use_ssl: None,
                use_compression: Some(false),
                compression_level: None,
                connection_reset_interval: None,
            }],
            ..create_test_config()
        };
        let endpoints = build_http_endpoints(&config).expect("valid");
        let additional = &endpoints.additionals[0];
        assert_eq!(additional.api_key, "test-api-key");
        assert!(additional.use_ssl);
        assert!(!additional.use_compression);
        assert_eq!(additional.connection_reset_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_transport_selection() {
        let config = create_test_config();
        assert!(needs_connectivity_probe(&config));
        assert!(build_endpoints(&config, HttpConnectivity::Success)
            .expect("valid")
            .use_http);
        assert!(!build_endpoints(&config, HttpConnectivity::Failure)
            .expect("valid")
            .use_http);

        let forced_tcp = Config {
            logs_config_use_tcp: true,
            ..create_test_config()
        };
        assert!(!needs_connectivity_probe(&forced_tcp));
        assert!(!build_endpoints(&forced_tcp, HttpConnectivity::Success)
            .expect("valid")
            .use_http);

        let forced_http = Config {
            logs_config_use_http: true,
            ..create_test_config()
        };
        assert!(build_endpoints(&forced_http, HttpConnectivity::Failure)
            .expect("valid")
            .use_http);
    }
}
