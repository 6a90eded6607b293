//! Observation of processed records for troubleshooting.
//!
//! The processor hands every record that survived the processing rules to a
//! [`MessageReceiver`] before encoding it. Receivers must never block or
//! fail the pipeline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use tracing::debug;

use crate::logs::constants::DIAGNOSTIC_BUFFER_SIZE;
use crate::logs::message::Message;

pub trait MessageReceiver: Send + Sync {
    fn handle_message(&self, msg: &Message, redacted: &[u8]);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMessageReceiver;

impl MessageReceiver for NoopMessageReceiver {
    fn handle_message(&self, _msg: &Message, _redacted: &[u8]) {}
}

/// Keeps the latest formatted records while enabled, up to a fixed capacity.
///
/// When the buffer is full, new records are dropped until a consumer calls
/// [`BufferedMessageReceiver::next`].
#[derive(Debug)]
pub struct BufferedMessageReceiver {
    enabled: AtomicBool,
    capacity: usize,
    buffer: Mutex<VecDeque<String>>,
}

impl Default for BufferedMessageReceiver {
    fn default() -> Self {
        Self::new(DIAGNOSTIC_BUFFER_SIZE)
    }
}

impl BufferedMessageReceiver {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Starts buffering. Returns `false` if already enabled.
    pub fn enable(&self) -> bool {
        !self.enabled.swap(true, Ordering::SeqCst)
    }

    /// Stops buffering and discards what was buffered.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Pops the oldest formatted record.
    pub fn next(&self) -> Option<String> {
        self.buffer.lock().ok()?.pop_front()
    }

    fn format(msg: &Message, redacted: &[u8]) -> String {
        let origin = &msg.origin;
        let timestamp = msg
            .timestamp
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        format!(
            "Integration Name: {} | Type: {} | Status: {} | Timestamp: {} | Hostname: {} | Service: {} | Source: {} | Tags: {} | Message: {}",
            origin.log_source.name,
            origin.log_source.config.kind,
            msg.status(),
            timestamp,
            crate::hostname::get_hostname(),
            origin.service(),
            origin.source(),
            origin.tags_to_string(),
            String::from_utf8_lossy(redacted),
        )
    }
}

impl MessageReceiver for BufferedMessageReceiver {
    fn handle_message(&self, msg: &Message, redacted: &[u8]) {
        if !self.is_enabled() {
            return;
        }
        let line = Self::format(msg, redacted);
        let Ok(mut buffer) = self.buffer.try_lock() else {
            debug!("LOGS | Diagnostic buffer busy, dropping record");
            return;
        };
        if buffer.len() >= self.capacity {
            debug!("LOGS | Diagnostic buffer full, dropping record");
            return;
        }
        buffer.push_back(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::message::{LogSource, LogsConfig, Origin};
    use std::sync::Arc;

    fn test_message() -> Message {
        let source = Arc::new(LogSource::new(
            "my-integration",
            LogsConfig {
                kind: "file".to_string(),
                service: "svc".to_string(),
                ..LogsConfig::default()
            },
        ));
        Message::new("raw", Origin::new(source), "warn")
    }

    #[test]
    fn test_disabled_receiver_keeps_nothing() {
        let receiver = BufferedMessageReceiver::default();
        receiver.handle_message(&test_message(), b"hello");
        assert_eq!(receiver.next(), None);
    }

    #[test]
    fn test_enabled_receiver_formats_records() {
        let receiver = BufferedMessageReceiver::default();
        assert!(receiver.enable());
        assert!(!receiver.enable());
        receiver.handle_message(&test_message(), b"hello");

        let line = receiver.next().expect("one line buffered");
        assert!(line.starts_with("Integration Name: my-integration | Type: file | Status: warn"));
        assert!(line.contains("| Service: svc |"));
        assert!(line.ends_with("| Message: hello"));
        assert_eq!(receiver.next(), None);
    }

    #[test]
    fn test_full_buffer_drops_without_blocking() {
        let receiver = BufferedMessageReceiver::new(2);
        receiver.enable();
        for _ in 0..5 {
            receiver.handle_message(&test_message(), b"x");
        }
        assert!(receiver.next().is_some());
        assert!(receiver.next().is_some());
        assert!(receiver.next().is_none());
    }

    #[test]
    fn test_disable_clears_buffer() {
        let receiver = BufferedMessageReceiver::default();
        receiver.enable();
        receiver.handle_message(&test_message(), b"x");
        receiver.disable();
        assert!(!receiver.is_enabled());
        assert_eq!(receiver.next(), None);
    }
}
