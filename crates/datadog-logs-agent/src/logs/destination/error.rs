//! Delivery outcomes, as classified by a destination.

/// Why a payload was not delivered.
///
/// Only [`DestinationError::Retryable`] is retried by the sender's main
/// path. [`DestinationError::Cancelled`] means the destinations context was
/// stopped and delivery must end.
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    /// Network failure or server-side (5xx) error.
    #[error("retryable error: {0}")]
    Retryable(String),
    /// The intake rejected the payload (4xx), typically bad credentials.
    #[error("client error: HTTP {0}")]
    Client(u16),
    #[error("delivery cancelled")]
    Cancelled,
    #[error("failed to encode payload: {0}")]
    Encoding(#[from] std::io::Error),
    /// The request could not be built, retrying would not help.
    #[error("invalid request: {0}")]
    Request(String),
}

impl DestinationError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, DestinationError::Retryable(_))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DestinationError::Cancelled)
    }
}

/// Maps an HTTP status to a delivery outcome.
pub fn classify_status(status: u16) -> Result<(), DestinationError> {
    if status >= 500 {
        Err(DestinationError::Retryable(format!("server error: HTTP {status}")))
    } else if status >= 400 {
        Err(DestinationError::Client(status))
    } else {
        Ok(())
    }
}
