//! Redaction, filtering and encoding of log records.
//!
//! Every pipeline runs one processor worker between its input queue and its
//! sender:
//!
//! ```text
//!   input_chan ──> rules (global, then source) ──> diagnostic receiver
//!                        │ dropped                       │
//!                        v                               v
//!                     (gone)                          encoder ──> sender queue
//! ```
//!
//! # Rule Execution Order
//!
//! Rules run in the order they are declared, global rules first:
//! - `exclude_at_match` drops the record when its pattern matches
//! - `include_at_match` drops the record when its pattern does not match
//! - `mask_sequences` replaces every match, later rules see the masked content
//!
//! The worker is an actor: besides its input queue it receives
//! [`ProcessorCommand`]s, so a flush can drain what is buffered without
//! racing the run loop for the queue.

use std::borrow::Cow;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::processing_rule::{Kind, Rule};
use crate::logs::constants::CHAN_SIZE;
use crate::logs::diagnostic::MessageReceiver;
use crate::logs::encoder::Encoder;
use crate::logs::message::Message;

/// Applies `global` then `source` rules to `content`.
///
/// Returns the redacted content, or `None` when a rule dropped the record.
#[must_use]
pub fn apply_rules<'a>(
    global: &[Rule],
    source: &[Rule],
    content: &'a [u8],
) -> Option<Cow<'a, [u8]>> {
    let mut content = Cow::Borrowed(content);
    for rule in global.iter().chain(source) {
        match rule.kind {
            Kind::ExcludeAtMatch => {
                if rule.regex.is_match(&content) {
                    return None;
                }
            }
            Kind::IncludeAtMatch => {
                if !rule.regex.is_match(&content) {
                    return None;
                }
            }
            Kind::MaskSequences => {
                let masked = match rule.regex.replace_all(&content, rule.placeholder.as_bytes()) {
                    Cow::Owned(masked) => Some(masked),
                    Cow::Borrowed(_) => None,
                };
                if let Some(masked) = masked {
                    content = Cow::Owned(masked);
                }
            }
        }
    }
    Some(content)
}

#[derive(Debug)]
pub enum ProcessorCommand {
    /// Process what is currently buffered, then reply on `done`.
    Flush {
        token: CancellationToken,
        done: oneshot::Sender<()>,
    },
}

struct ProcessorWorker {
    input: mpsc::Receiver<Message>,
    output: mpsc::Sender<Message>,
    commands: mpsc::UnboundedReceiver<ProcessorCommand>,
    stop: CancellationToken,
    rules: Arc<[Rule]>,
    encoder: Arc<dyn Encoder>,
    diagnostic: Arc<dyn MessageReceiver>,
}

impl ProcessorWorker {
    async fn run(mut self) {
        debug!("PROCESSOR | Started");
        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                Some(command) = self.commands.recv() => match command {
                    ProcessorCommand::Flush { token, done } => {
                        self.drain_buffered(&token).await;
                        let _ = done.send(());
                    }
                },
                msg = self.input.recv() => match msg {
                    Some(msg) => self.process(msg).await,
                    None => break,
                },
            }
        }

        // Nothing new gets in; whatever is already queued is still processed.
        self.input.close();
        while let Some(msg) = self.input.recv().await {
            self.process(msg).await;
        }
        debug!("PROCESSOR | Stopped");
    }

    async fn drain_buffered(&mut self, token: &CancellationToken) {
        while !token.is_cancelled() {
            match self.input.try_recv() {
                Ok(msg) => self.process(msg).await,
                Err(_) => break,
            }
        }
    }

    async fn process(&self, mut msg: Message) {
        let source_rules = msg.origin.log_source.rules();
        let Some(redacted) = apply_rules(&self.rules, source_rules, &msg.content) else {
            return;
        };
        let redacted = redacted.into_owned();

        self.diagnostic.handle_message(&msg, &redacted);

        match self.encoder.encode(&msg, &redacted) {
            Ok(payload) => {
                msg.content = payload;
                if self.output.send(msg).await.is_err() {
                    debug!("PROCESSOR | Sender is gone, dropping record");
                }
            }
            Err(e) => error!("PROCESSOR | Unable to encode msg: {e}"),
        }
    }
}

/// Handle on a processor worker.
pub struct Processor {
    input_tx: mpsc::Sender<Message>,
    commands: mpsc::UnboundedSender<ProcessorCommand>,
    stop: CancellationToken,
    worker: Option<ProcessorWorker>,
    handle: Option<JoinHandle<()>>,
}

impl Processor {
    #[must_use]
    pub fn new(
        output: mpsc::Sender<Message>,
        rules: Arc<[Rule]>,
        encoder: Arc<dyn Encoder>,
        diagnostic: Arc<dyn MessageReceiver>,
    ) -> Self {
        let (input_tx, input) = mpsc::channel(CHAN_SIZE);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let worker = ProcessorWorker {
            input,
            output,
            commands: commands_rx,
            stop: stop.clone(),
            rules,
            encoder,
            diagnostic,
        };
        Self {
            input_tx,
            commands,
            stop,
            worker: Some(worker),
            handle: None,
        }
    }

    /// Queue tailers push records into.
    #[must_use]
    pub fn input_chan(&self) -> mpsc::Sender<Message> {
        self.input_tx.clone()
    }

    pub fn start(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.handle = Some(tokio::spawn(worker.run()));
        }
    }

    /// Stops accepting records and returns once every queued record went through.
    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("PROCESSOR | Worker failed: {e}");
            }
        }
        self.worker = None;
    }

    /// Processes the records buffered right now, giving up when `token` is cancelled.
    pub async fn flush(&self, token: &CancellationToken) {
        if self.handle.is_none() {
            return;
        }
        let (done, done_rx) = oneshot::channel();
        let command = ProcessorCommand::Flush {
            token: token.clone(),
            done,
        };
        if self.commands.send(command).is_err() {
            return;
        }
        tokio::select! {
            _ = done_rx => {}
            () = token.cancelled() => {}
        }
    }
}
