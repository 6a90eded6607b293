//! Network targets payloads are delivered to.
//!
//! A pipeline owns one [`Destinations`]: the main destination, which the
//! sender retries until it succeeds, and any number of additional ones,
//! which receive copies of the same payloads on a best-effort basis through
//! an [`AsyncDestination`] worker.

pub mod content_encoding;
pub mod context;
pub mod error;
pub mod http;
pub mod tcp;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::endpoints::{Endpoint, Endpoints};
use crate::logs::constants::CHAN_SIZE;
use context::DestinationsContext;
use error::DestinationError;

#[async_trait]
pub trait Destination: Send + Sync {
    /// Delivers one payload and classifies the outcome.
    async fn send(&self, payload: &[u8]) -> Result<(), DestinationError>;

    /// Where payloads go, for logging.
    fn target(&self) -> &str;
}

/// Best-effort wrapper around a destination.
///
/// Payloads are queued and delivered by a background worker, which runs at
/// most `max_concurrent` sends at a time (`0` sends inline, one at a time).
/// When the queue is full the payload is dropped. Failures are logged and
/// never retried.
pub struct AsyncDestination {
    destination: Arc<dyn Destination>,
    max_concurrent: usize,
    payload_tx: mpsc::Sender<Vec<u8>>,
    payload_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl AsyncDestination {
    #[must_use]
    pub fn new(destination: Arc<dyn Destination>, max_concurrent: usize) -> Self {
        let (payload_tx, payload_rx) = mpsc::channel(CHAN_SIZE);
        Self {
            destination,
            max_concurrent,
            payload_tx,
            payload_rx: Mutex::new(Some(payload_rx)),
        }
    }

    /// Spawns the delivery worker. It runs until `context` is stopped.
    ///
    /// Only the first call spawns anything.
    pub fn start(&self, context: &DestinationsContext) -> Option<JoinHandle<()>> {
        let payload_rx = match self.payload_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }?;
        let worker = AsyncWorker {
            destination: Arc::clone(&self.destination),
            semaphore: (self.max_concurrent > 0)
                .then(|| Arc::new(Semaphore::new(self.max_concurrent))),
            payload_rx,
            token: context.token(),
        };
        Some(tokio::spawn(worker.run()))
    }

    /// Queues a copy of `payload`, dropping it when the queue is full.
    pub fn send_async(&self, payload: &[u8]) {
        if let Err(e) = self.payload_tx.try_send(payload.to_vec()) {
            debug!(
                "DESTINATION | Dropping payload for {}: {e}",
                self.destination.target()
            );
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        self.destination.target()
    }
}

struct AsyncWorker {
    destination: Arc<dyn Destination>,
    semaphore: Option<Arc<Semaphore>>,
    payload_rx: mpsc::Receiver<Vec<u8>>,
    token: CancellationToken,
}

impl AsyncWorker {
    async fn run(mut self) {
        loop {
            let payload = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                payload = self.payload_rx.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };

            let Some(semaphore) = &self.semaphore else {
                deliver(self.destination.as_ref(), &payload).await;
                continue;
            };
            let permit = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let destination = Arc::clone(&self.destination);
            tokio::spawn(async move {
                deliver(destination.as_ref(), &payload).await;
                drop(permit);
            });
        }
        debug!(
            "DESTINATION | Additional destination {} stopped",
            self.destination.target()
        );
    }
}

async fn deliver(destination: &dyn Destination, payload: &[u8]) {
    match destination.send(payload).await {
        Ok(()) | Err(DestinationError::Cancelled) => {}
        Err(e) => warn!(
            "DESTINATION | Could not send payload to {}: {e}",
            destination.target()
        ),
    }
}

/// The destinations a sender delivers to.
pub struct Destinations {
    pub main: Arc<dyn Destination>,
    pub additionals: Vec<AsyncDestination>,
}

impl Destinations {
    #[must_use]
    pub fn new(main: Arc<dyn Destination>, additionals: Vec<AsyncDestination>) -> Self {
        Self { main, additionals }
    }

    /// Builds HTTP or TCP destinations for `endpoints`.
    #[must_use]
    pub fn from_endpoints(endpoints: &Endpoints, context: &Arc<DestinationsContext>) -> Self {
        let build = |endpoint: &Endpoint| -> Arc<dyn Destination> {
            if endpoints.use_http {
                Arc::new(http::HttpDestination::new(
                    endpoint,
                    http::JSON_CONTENT_TYPE,
                    Arc::clone(context),
                ))
            } else {
                Arc::new(tcp::TcpDestination::new(endpoint, Arc::clone(context)))
            }
        };
        let main = build(&endpoints.main);
        let additionals = endpoints
            .additionals
            .iter()
            .map(|endpoint| {
                AsyncDestination::new(build(endpoint), endpoints.batch_max_concurrent_send)
            })
            .collect();
        Self { main, additionals }
    }

    /// Starts the worker of every additional destination.
    pub fn start(&self, context: &DestinationsContext) -> Vec<JoinHandle<()>> {
        self.additionals
            .iter()
            .filter_map(|additional| additional.start(context))
            .collect()
    }
}
