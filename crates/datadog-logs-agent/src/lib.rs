//! # Datadog Logs Agent
//!
//! The log-shipping core of the Datadog agent: it takes records read by
//! tailers, redacts and encodes them, delivers them to the logs intake and
//! remembers, per source, how far delivery got so a restarted agent resumes
//! where it left off.
//!
//! ## Architecture
//!
//! ```text
//!   tailers ──> Provider (round-robin) ──> Pipeline 1..N ──> Auditor ──> registry.json
//!                                           │
//!                                           └─ Processor ──> Sender ──> destinations
//! ```
//!
//! - [`config`]: YAML and environment configuration, endpoint resolution
//! - [`logs`]: the pipelines, destinations and auditor
//! - [`logger`]: formatting of the agent's own diagnostic output
//! - [`http`]: HTTP client construction
//! - [`hostname`]: hostname reported with every record

// Allow use of the `coverage_nightly` attribute for code coverage
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_copy_implementations)]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]

/// Configuration management - YAML files, environment variables, and defaults
pub mod config;

/// Hostname resolution
pub mod hostname;

/// HTTP client construction for the logs intake
pub mod http;

/// Logging infrastructure and tracing setup
pub mod logger;

/// Log processing, delivery and offset auditing
pub mod logs;
