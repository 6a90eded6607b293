//! One processor and one sender, wired back to back.
//!
//! ```text
//!   input_chan ──> Processor ──(CHAN_SIZE)──> Sender ──> auditor channel
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::endpoints::Endpoints;
use crate::config::processing_rule::Rule;
use crate::logs::constants::CHAN_SIZE;
use crate::logs::destination::context::DestinationsContext;
use crate::logs::destination::Destinations;
use crate::logs::diagnostic::MessageReceiver;
use crate::logs::encoder::Encoder;
use crate::logs::message::Message;
use crate::logs::processor::Processor;
use crate::logs::sender::{Backoff, Sender};
use crate::logs::strategy::{StreamStrategy, Strategy};

pub struct Pipeline {
    processor: Processor,
    sender: Sender,
}

impl Pipeline {
    /// Builds a pipeline delivering to `destinations` and forwarding
    /// delivered records to `output`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        output: mpsc::Sender<Message>,
        rules: Arc<[Rule]>,
        destinations: Destinations,
        strategy: Arc<dyn Strategy>,
        context: Arc<DestinationsContext>,
        backoff: Backoff,
        encoder: Arc<dyn Encoder>,
        diagnostic: Arc<dyn MessageReceiver>,
    ) -> Self {
        let (sender_tx, sender_rx) = mpsc::channel(CHAN_SIZE);
        let sender = Sender::new(sender_rx, output, destinations, strategy, context, backoff);
        let processor = Processor::new(sender_tx, rules, encoder, diagnostic);
        Self { processor, sender }
    }

    /// Builds a stream pipeline for `endpoints`, over HTTP or TCP.
    #[must_use]
    pub fn from_endpoints(
        output: mpsc::Sender<Message>,
        rules: Arc<[Rule]>,
        endpoints: &Endpoints,
        context: &Arc<DestinationsContext>,
        backoff: Backoff,
        encoder: Arc<dyn Encoder>,
        diagnostic: Arc<dyn MessageReceiver>,
    ) -> Self {
        Self::new(
            output,
            rules,
            Destinations::from_endpoints(endpoints, context),
            Arc::new(StreamStrategy),
            Arc::clone(context),
            backoff,
            encoder,
            diagnostic,
        )
    }

    pub fn start(&mut self) {
        self.sender.start();
        self.processor.start();
    }

    /// Stops the processor, then the sender once it drained what the
    /// processor produced.
    pub async fn stop(&mut self) {
        self.processor.stop().await;
        self.sender.stop().await;
    }

    pub async fn flush(&self, token: &CancellationToken) {
        self.processor.flush(token).await;
        if !token.is_cancelled() {
            self.sender.flush(token).await;
        }
    }

    #[must_use]
    pub fn input_chan(&self) -> mpsc::Sender<Message> {
        self.processor.input_chan()
    }
}
