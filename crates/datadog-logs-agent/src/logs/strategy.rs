//! Delivery policies for the sender.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::logs::destination::error::DestinationError;
use crate::logs::message::Message;

/// Delivers one encoded payload, retrying as the sender sees fit.
#[async_trait]
pub trait Transmit: Send + Sync {
    async fn transmit(&self, payload: &[u8]) -> Result<(), DestinationError>;
}

/// Drains `input`, hands payloads to `transmit` and forwards delivered
/// records to `output`.
///
/// Implementations return once `input` is closed and empty, or as soon as
/// `transmit` reports a cancellation.
#[async_trait]
pub trait Strategy: Send + Sync {
    async fn send(
        &self,
        input: &mut mpsc::Receiver<Message>,
        output: &mpsc::Sender<Message>,
        transmit: &dyn Transmit,
    );

    /// Delivers whatever the strategy holds back, until `token` is cancelled.
    async fn flush(&self, token: &CancellationToken);
}

/// Sends one record at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamStrategy;

#[async_trait]
impl Strategy for StreamStrategy {
    async fn send(
        &self,
        input: &mut mpsc::Receiver<Message>,
        output: &mpsc::Sender<Message>,
        transmit: &dyn Transmit,
    ) {
        while let Some(msg) = input.recv().await {
            debug!(
                "SENDER | Record from {} queued for {:?}",
                msg.origin.log_source.name,
                msg.latency()
            );
            match transmit.transmit(&msg.content).await {
                Ok(()) => {
                    if output.send(msg).await.is_err() {
                        debug!("SENDER | Auditor is gone, not recording progress");
                    }
                }
                Err(DestinationError::Cancelled) => return,
                Err(e) => warn!("SENDER | Could not send payload: {e}"),
            }
        }
    }

    async fn flush(&self, _token: &CancellationToken) {}
}
