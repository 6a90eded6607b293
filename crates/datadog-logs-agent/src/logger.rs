//! The agent's own diagnostic output.
//!
//! Every line is prefixed so it can be told apart from the records the agent
//! ships:
//!
//! ```text
//! DD_LOGS_AGENT | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! For example:
//!
//! ```text
//! DD_LOGS_AGENT | WARN | SENDER | Could not send payload: client error: HTTP 403
//! DD_LOGS_AGENT | DEBUG | AUDITOR | Stopped
//! ```

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::log_level::LogLevel;

const PREFIX: &str = "DD_LOGS_AGENT";

/// Event formatter producing `DD_LOGS_AGENT | LEVEL | ...` lines.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                // Filled in by the fmt layer when the span was created.
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Builds the filter for `level`, letting `RUST_LOG` override it.
///
/// Chatty transport crates are silenced either way.
pub fn env_filter(level: LogLevel) -> Result<EnvFilter, LoggerError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::try_new(format!(
        "h2=off,hyper=off,rustls=off,{}",
        level.as_ref()
    ))?)
}

/// Installs the global subscriber.
pub fn init(level: LogLevel) -> Result<(), LoggerError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(level)?)
        .with_ansi(false)
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
