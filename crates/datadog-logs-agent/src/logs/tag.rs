//! Host tags added to records for a limited time after start.
//!
//! When `logs_config.expected_tags_duration` is set, every record shipped
//! before `start + duration` carries the host tags, so logs sent while the
//! intake has not yet learned the host's tags are still attributed
//! correctly. With a zero duration no host tags are ever added.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct HostTagProvider {
    tags: Vec<String>,
    deadline: Option<Instant>,
}

impl HostTagProvider {
    #[must_use]
    pub fn new(tags: Vec<String>, expected_tags_duration: Duration) -> Self {
        Self::starting_at(tags, expected_tags_duration, Instant::now())
    }

    #[must_use]
    pub fn starting_at(
        tags: Vec<String>,
        expected_tags_duration: Duration,
        start: Instant,
    ) -> Self {
        let deadline = if expected_tags_duration.is_zero() || tags.is_empty() {
            None
        } else {
            start.checked_add(expected_tags_duration)
        };
        Self { tags, deadline }
    }

    /// Never adds anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tags: Vec::new(),
            deadline: None,
        }
    }

    /// Host tags to add to a record handled now.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        self.tags_at(Instant::now())
    }

    #[must_use]
    pub fn tags_at(&self, now: Instant) -> &[String] {
        match self.deadline {
            Some(deadline) if now < deadline => &self.tags,
            _ => &[],
        }
    }
}
