//! Body encodings understood by the HTTP intake.

use std::borrow::Cow;
use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    /// Gzip at a level clamped to `0..=9`.
    Gzip(u32),
}

impl ContentEncoding {
    /// Gzip when `use_compression`, identity otherwise.
    #[must_use]
    pub fn from_settings(use_compression: bool, level: i32) -> Self {
        if use_compression {
            ContentEncoding::Gzip(u32::try_from(level.clamp(0, 9)).unwrap_or(6))
        } else {
            ContentEncoding::Identity
        }
    }

    /// Value of the `Content-Encoding` header.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Gzip(_) => "gzip",
        }
    }

    pub fn encode(self, payload: &[u8]) -> io::Result<Cow<'_, [u8]>> {
        match self {
            ContentEncoding::Identity => Ok(Cow::Borrowed(payload)),
            ContentEncoding::Gzip(level) => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
                encoder.write_all(payload)?;
                Ok(Cow::Owned(encoder.finish()?))
            }
        }
    }
}
