//! Structured capture errors. Malformed records are fatal for replay and
//! carry the byte offset of the failure so a broken capture can be
//! inspected with a hex dump.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("bad capture magic at offset {offset}")]
    BadMagic { offset: usize },

    #[error("unsupported capture version {version} (supported: 2, 3)")]
    UnsupportedVersion { version: u32 },

    #[error("truncated capture at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("record at offset {offset} declares negative payload length {len}")]
    NegativeLength { offset: usize, len: i32 },

    #[error("bad frame magic in payload at offset {offset}")]
    BadFrameMagic { offset: usize },

    #[error("malformed meta record at offset {offset}: {source}")]
    Meta {
        offset: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
