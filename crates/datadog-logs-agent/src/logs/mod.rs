//! Log processing and delivery.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────┐
//!                     │   Tailers    │  (files, containers, network, ...)
//!                     └──────┬───────┘
//!                            │ Provider::next_pipeline_chan (round-robin)
//!                            v
//!          ┌─────────────────────────────────────┐
//!          │ Pipeline                            │  x logs_config.pipelines
//!          │   Processor ──(CHAN_SIZE)──> Sender │
//!          └──────────────────────────┬──────────┘
//!                  main destination   │   additional destinations
//!                  (retried)          │   (best-effort)
//!                            v
//!                     ┌──────────────┐
//!                     │   Auditor    │ ──> registry.json
//!                     └──────────────┘
//! ```
//!
//! # Components
//!
//! - **[`processor`]**: processing rules, diagnostic observation, encoding
//! - **[`sender`]** / **[`strategy`]**: delivery to the destinations
//! - **[`destination`]**: HTTP and TCP transports, shared cancellation
//! - **[`pipeline`]** / **[`provider`]**: wiring and load distribution
//! - **[`auditor`]**: persisted delivery progress
//! - **[`agent`]**: composition root and ordered shutdown
//!
//! # Backpressure
//!
//! Every queue is bounded. A main destination that keeps failing blocks its
//! sender, which fills the processor's output, which fills the pipeline
//! input, which blocks the tailers. Records are never dropped because the
//! intake is slow, only because it rejected them or a rule excluded them.

pub mod agent;
pub mod auditor;
pub mod constants;
pub mod destination;
pub mod diagnostic;
pub mod encoder;
pub mod message;
pub mod pipeline;
pub mod processor;
pub mod provider;
pub mod sender;
pub mod strategy;
pub mod tag;
