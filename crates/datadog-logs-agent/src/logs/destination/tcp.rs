//! Plain TCP transport, used when the HTTP intake is unreachable.
//!
//! Every payload is written as one frame, `<api_key> <payload>\n`, on a
//! connection that is opened lazily and re-opened after any failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::endpoints::Endpoint;
use crate::logs::destination::context::DestinationsContext;
use crate::logs::destination::error::DestinationError;
use crate::logs::destination::Destination;

#[derive(Debug)]
pub struct TcpDestination {
    address: String,
    prefix: Vec<u8>,
    reset_interval: Duration,
    connection: Mutex<Option<(TcpStream, Instant)>>,
    context: Arc<DestinationsContext>,
}

impl TcpDestination {
    #[must_use]
    pub fn new(endpoint: &Endpoint, context: Arc<DestinationsContext>) -> Self {
        if endpoint.use_ssl {
            warn!(
                "DESTINATION | TLS is not supported on the TCP transport, connecting to {} in clear text",
                endpoint.address()
            );
        }
        let prefix = if endpoint.api_key.is_empty() {
            Vec::new()
        } else {
            format!("{} ", endpoint.api_key).into_bytes()
        };
        Self {
            address: endpoint.address(),
            prefix,
            reset_interval: endpoint.connection_reset_interval,
            connection: Mutex::new(None),
            context,
        }
    }

    fn frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.prefix.len() + payload.len() + 1);
        frame.extend_from_slice(&self.prefix);
        frame.extend_from_slice(payload);
        frame.push(b'\n');
        frame
    }

    async fn write(&self, frame: &[u8]) -> Result<(), DestinationError> {
        let mut connection = self.connection.lock().await;
        let expired = connection.as_ref().is_some_and(|(_, opened)| {
            !self.reset_interval.is_zero() && opened.elapsed() >= self.reset_interval
        });
        if expired {
            debug!("DESTINATION | Resetting connection to {}", self.address);
            *connection = None;
        }

        if connection.is_none() {
            let stream = TcpStream::connect(&self.address)
                .await
                .map_err(|e| DestinationError::Retryable(e.to_string()))?;
            *connection = Some((stream, Instant::now()));
        }

        let Some((stream, _)) = connection.as_mut() else {
            return Err(DestinationError::Retryable("not connected".to_string()));
        };
        if let Err(e) = stream.write_all(frame).await {
            *connection = None;
            return Err(DestinationError::Retryable(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Destination for TcpDestination {
    async fn send(&self, payload: &[u8]) -> Result<(), DestinationError> {
        let token = self.context.token();
        if token.is_cancelled() {
            return Err(DestinationError::Cancelled);
        }
        let frame = self.frame(payload);
        let written = tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = self.write(&frame) => Some(result),
        };
        match written {
            Some(result) => result,
            None => {
                // The frame may have been cut short, the stream is no longer aligned.
                self.connection.lock().await.take();
                Err(DestinationError::Cancelled)
            }
        }
    }

    fn target(&self) -> &str {
        &self.address
    }
}
