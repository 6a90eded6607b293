//! Delivery of encoded records to the destinations of a pipeline.
//!
//! The main destination is authoritative: a payload is retried until it is
//! accepted, rejected with a client error, or the destinations context is
//! stopped. While it retries the sender stops draining its input, which
//! propagates backpressure up to the tailers. Additional destinations get a
//! copy of every payload the main destination accepted, best-effort.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::logs::destination::context::DestinationsContext;
use crate::logs::destination::error::DestinationError;
use crate::logs::destination::Destinations;
use crate::logs::message::Message;
use crate::logs::strategy::{Strategy, Transmit};

/// Wait between consecutive retryable failures of the main destination:
/// `min(max, base * factor^(n - 1))` seconds after the `n`-th failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: f64,
    pub factor: f64,
    pub max: f64,
}

impl Backoff {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            base: config.logs_config_sender_backoff_base,
            factor: config.logs_config_sender_backoff_factor,
            max: config.logs_config_sender_backoff_max,
        }
    }

    /// Retries immediately.
    #[must_use]
    pub fn none() -> Self {
        Self {
            base: 0.0,
            factor: 1.0,
            max: 0.0,
        }
    }

    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 || self.base <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let secs = self.base * self.factor.powi(exponent);
        let secs = if secs.is_finite() {
            secs.min(self.max)
        } else {
            self.max
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

struct DestinationsTransmit {
    destinations: Destinations,
    context: Arc<DestinationsContext>,
    backoff: Backoff,
}

#[async_trait]
impl Transmit for DestinationsTransmit {
    async fn transmit(&self, payload: &[u8]) -> Result<(), DestinationError> {
        let main = &self.destinations.main;
        let mut failures: u32 = 0;
        loop {
            match main.send(payload).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() => {
                    failures = failures.saturating_add(1);
                    let delay = self.backoff.delay(failures);
                    warn!(
                        "SENDER | Could not send payload to {} ({failures} consecutive failures), retrying in {delay:?}: {e}",
                        main.target()
                    );
                    if delay.is_zero() {
                        continue;
                    }
                    let token = self.context.token();
                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Err(DestinationError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }

        for additional in &self.destinations.additionals {
            additional.send_async(payload);
        }
        Ok(())
    }
}

/// Drives one stream of records through a [`Strategy`].
pub struct Sender {
    input: Option<mpsc::Receiver<Message>>,
    output: Option<mpsc::Sender<Message>>,
    strategy: Arc<dyn Strategy>,
    transmit: Arc<DestinationsTransmit>,
    handle: Option<JoinHandle<()>>,
}

impl Sender {
    #[must_use]
    pub fn new(
        input: mpsc::Receiver<Message>,
        output: mpsc::Sender<Message>,
        destinations: Destinations,
        strategy: Arc<dyn Strategy>,
        context: Arc<DestinationsContext>,
        backoff: Backoff,
    ) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
            strategy,
            transmit: Arc::new(DestinationsTransmit {
                destinations,
                context,
                backoff,
            }),
            handle: None,
        }
    }

    /// Starts the additional destinations' workers, then the delivery loop.
    pub fn start(&mut self) {
        let (Some(mut input), Some(output)) = (self.input.take(), self.output.take()) else {
            return;
        };
        let transmit = Arc::clone(&self.transmit);
        transmit.destinations.start(&transmit.context);

        let strategy = Arc::clone(&self.strategy);
        self.handle = Some(tokio::spawn(async move {
            debug!("SENDER | Started");
            strategy.send(&mut input, &output, transmit.as_ref()).await;
            debug!("SENDER | Stopped");
        }));
    }

    /// Waits for the delivery loop to end.
    ///
    /// The loop ends once every producer of the input queue is gone and the
    /// queue is drained, so the processor feeding it must be stopped first.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("SENDER | Worker failed: {e}");
            }
        }
        self.input = None;
        self.output = None;
    }

    pub async fn flush(&self, token: &CancellationToken) {
        self.strategy.flush(token).await;
    }
}
