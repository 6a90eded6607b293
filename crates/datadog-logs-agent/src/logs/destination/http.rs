//! HTTP transport to the logs intake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, info, warn};

use crate::config::endpoints::{Endpoint, HttpConnectivity};
use crate::http::ResetClient;
use crate::logs::constants::{HTTP_CONNECTIVITY_TIMEOUT, HTTP_SEND_TIMEOUT, INTAKE_PATH};
use crate::logs::destination::content_encoding::ContentEncoding;
use crate::logs::destination::context::DestinationsContext;
use crate::logs::destination::error::{classify_status, DestinationError};
use crate::logs::destination::Destination;

pub const TEXT_CONTENT_TYPE: &str = "text/plain";
pub const JSON_CONTENT_TYPE: &str = "application/json";

const API_KEY_HEADER: &str = "DD-API-KEY";

/// Posts each payload to `<scheme>://<host>[:<port>]/api/v1/logs/input`.
#[derive(Debug)]
pub struct HttpDestination {
    url: String,
    api_key: String,
    content_type: &'static str,
    content_encoding: ContentEncoding,
    client: ResetClient,
    context: Arc<DestinationsContext>,
}

impl HttpDestination {
    #[must_use]
    pub fn new(
        endpoint: &Endpoint,
        content_type: &'static str,
        context: Arc<DestinationsContext>,
    ) -> Self {
        Self::with_timeout(endpoint, content_type, context, HTTP_SEND_TIMEOUT)
    }

    fn with_timeout(
        endpoint: &Endpoint,
        content_type: &'static str,
        context: Arc<DestinationsContext>,
        timeout: Duration,
    ) -> Self {
        Self {
            url: build_url(endpoint),
            api_key: endpoint.api_key.clone(),
            content_type,
            content_encoding: ContentEncoding::from_settings(
                endpoint.use_compression,
                endpoint.compression_level,
            ),
            client: ResetClient::new(
                endpoint.connection_reset_interval,
                timeout,
                endpoint.proxy_address.clone(),
            ),
            context,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Destination for HttpDestination {
    async fn send(&self, payload: &[u8]) -> Result<(), DestinationError> {
        let token = self.context.token();
        if token.is_cancelled() {
            return Err(DestinationError::Cancelled);
        }

        let body = self.content_encoding.encode(payload)?.into_owned();
        let request = self
            .client
            .client()
            .post(&self.url)
            .header(CONTENT_TYPE, self.content_type)
            .header(CONTENT_ENCODING, self.content_encoding.name())
            .header(API_KEY_HEADER, &self.api_key)
            .body(body);

        let response = tokio::select! {
            biased;
            () = token.cancelled() => return Err(DestinationError::Cancelled),
            response = request.send() => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) if token.is_cancelled() => {
                debug!("DESTINATION | Request to {} cancelled: {e}", self.url);
                return Err(DestinationError::Cancelled);
            }
            Err(e) if e.is_builder() => return Err(DestinationError::Request(e.to_string())),
            Err(e) => return Err(DestinationError::Retryable(e.to_string())),
        };

        let status = response.status().as_u16();
        // Drain the body so the connection can be reused.
        if let Err(e) = response.bytes().await {
            debug!("DESTINATION | Failed to read response body from {}: {e}", self.url);
        }
        classify_status(status)
    }

    fn target(&self) -> &str {
        &self.url
    }
}

fn build_url(endpoint: &Endpoint) -> String {
    let scheme = if endpoint.use_ssl { "https" } else { "http" };
    format!("{scheme}://{}{INTAKE_PATH}", endpoint.address())
}

/// Sends an empty payload to `endpoint` and reports whether it was accepted.
pub async fn check_connectivity(endpoint: &Endpoint) -> HttpConnectivity {
    info!("LOGS | Checking HTTP connectivity...");
    let context = Arc::new(DestinationsContext::new());
    context.start();
    let destination = HttpDestination::with_timeout(
        endpoint,
        JSON_CONTENT_TYPE,
        Arc::clone(&context),
        HTTP_CONNECTIVITY_TIMEOUT,
    );
    info!(
        "LOGS | Sending HTTP connectivity request to {}...",
        destination.url
    );
    let result = destination.send(&[]).await;
    context.stop();
    match result {
        Ok(()) => {
            info!("LOGS | HTTP connectivity successful");
            HttpConnectivity::Success
        }
        Err(e) => {
            warn!("LOGS | HTTP connectivity failure: {e}");
            HttpConnectivity::Failure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn create_test_endpoint(server_url: &str) -> Endpoint {
        let address = server_url.trim_start_matches("http://");
        let (host, port) = address.split_once(':').expect("host:port");
        Endpoint {
            api_key: "test-api-key".to_string(),
            host: host.to_string(),
            port: port.parse().expect("port"),
            use_ssl: false,
            use_compression: false,
            compression_level: 6,
            proxy_address: None,
            connection_reset_interval: Duration::ZERO,
        }
    }

    fn started_context() -> Arc<DestinationsContext> {
        let context = Arc::new(DestinationsContext::new());
        context.start();
        context
    }

    #[test]
    fn test_build_url() {
        let mut endpoint = create_test_endpoint("http://intake.example.com:8080");
        assert_eq!(
            build_url(&endpoint),
            "http://intake.example.com:8080/api/v1/logs/input"
        );
        endpoint.use_ssl = true;
        endpoint.port = 0;
        assert_eq!(
            build_url(&endpoint),
            "https://intake.example.com/api/v1/logs/input"
        );
    }

    #[tokio::test]
    async fn test_send_success_with_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", INTAKE_PATH)
            .match_header("content-type", JSON_CONTENT_TYPE)
            .match_header("content-encoding", "identity")
            .match_header("dd-api-key", "test-api-key")
            .match_body("{\"message\":\"a\"}")
            .with_status(200)
            .create_async()
            .await;

        let destination = HttpDestination::new(
            &create_test_endpoint(&server.url()),
            JSON_CONTENT_TYPE,
            started_context(),
        );
        destination
            .send(b"{\"message\":\"a\"}")
            .await
            .expect("should be delivered");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_plain_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", INTAKE_PATH)
            .match_header("content-type", TEXT_CONTENT_TYPE)
            .match_body("raw line")
            .with_status(200)
            .create_async()
            .await;

        let destination = HttpDestination::new(
            &create_test_endpoint(&server.url()),
            TEXT_CONTENT_TYPE,
            started_context(),
        );
        destination.send(b"raw line").await.expect("delivered");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_gzip_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", INTAKE_PATH)
            .match_header("content-encoding", "gzip")
            .match_request(|request| {
                let Ok(body) = request.body() else {
                    return false;
                };
                let mut decoded = String::new();
                GzDecoder::new(&body[..])
                    .read_to_string(&mut decoded)
                    .is_ok()
                    && decoded == "hello"
            })
            .with_status(202)
            .create_async()
            .await;

        let mut endpoint = create_test_endpoint(&server.url());
        endpoint.use_compression = true;
        let destination = HttpDestination::new(&endpoint, JSON_CONTENT_TYPE, started_context());
        destination.send(b"hello").await.expect("delivered");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", INTAKE_PATH)
            .with_status(503)
            .create_async()
            .await;

        let destination = HttpDestination::new(
            &create_test_endpoint(&server.url()),
            JSON_CONTENT_TYPE,
            started_context(),
        );
        let err = destination.send(b"x").await.expect_err("should fail");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_is_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", INTAKE_PATH)
            .with_status(403)
            .create_async()
            .await;

        let destination = HttpDestination::new(
            &create_test_endpoint(&server.url()),
            JSON_CONTENT_TYPE,
            started_context(),
        );
        let err = destination.send(b"x").await.expect_err("should fail");
        assert!(matches!(err, DestinationError::Client(403)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("addr");
        drop(listener);

        let destination = HttpDestination::new(
            &create_test_endpoint(&format!("http://{address}")),
            JSON_CONTENT_TYPE,
            started_context(),
        );
        let err = destination.send(b"x").await.expect_err("should fail");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stopped_context_cancels() {
        let context = started_context();
        let destination = HttpDestination::new(
            &create_test_endpoint("http://127.0.0.1:9"),
            JSON_CONTENT_TYPE,
            Arc::clone(&context),
        );
        context.stop();
        let err = destination.send(b"x").await.expect_err("should fail");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_check_connectivity() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", INTAKE_PATH)
            .with_status(200)
            .create_async()
            .await;
        let endpoint = create_test_endpoint(&server.url());
        assert_eq!(
            check_connectivity(&endpoint).await,
            HttpConnectivity::Success
        );

        let mut failing = mockito::Server::new_async().await;
        let _mock = failing
            .mock("POST", INTAKE_PATH)
            .with_status(500)
            .create_async()
            .await;
        let endpoint = create_test_endpoint(&failing.url());
        assert_eq!(
            check_connectivity(&endpoint).await,
            HttpConnectivity::Failure
        );
    }
}
