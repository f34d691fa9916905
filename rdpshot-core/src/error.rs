//! Domain-specific error types for rdpshot.
//!
//! All fallible operations return `Result<T, CaptureError>`.
//! Per-session errors never escape their session; the orchestrator only
//! sees them as a logged end reason.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The canonical error type for the capture pipeline.
#[derive(Debug, Error)]
pub enum CaptureError {
    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The connect attempt did not complete in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A `host[:port]` argument could not be parsed.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    // ── Bitmap Errors ────────────────────────────────────────────
    /// The bitmap colour depth is not one we can convert.
    #[error("unsupported bits per pixel: {0}")]
    UnsupportedBitsPerPixel(u8),

    /// The bitmap payload is shorter than its declared dimensions.
    #[error("bitmap too short: expected {expected} bytes, got {actual}")]
    BitmapTooShort { expected: usize, actual: usize },

    /// The destination rectangle is malformed (right < left or bottom < top).
    #[error("invalid rectangle ({left},{top})-({right},{bottom})")]
    InvalidRectangle {
        left: u32,
        top: u32,
        right: u32,
        bottom: u32,
    },

    /// The bitmap's declared size is beyond what we are willing to decode.
    #[error("bitmap {width}x{height} needs {size} bytes (max {max})")]
    BitmapTooLarge {
        width: u32,
        height: u32,
        size: u64,
        max: usize,
    },

    /// A compressed bitmap payload could not be inflated.
    #[error("decompression failed: {0}")]
    Decompress(String),

    // ── Persistence Errors ───────────────────────────────────────
    /// The image codec failed to write the screenshot.
    #[error("cannot save screenshot to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The screenshot file could not be created or flushed.
    #[error("cannot write screenshot file {}: {source}", path.display())]
    PersistIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Wire Errors ──────────────────────────────────────────────
    /// Received bytes that do not start with the frame magic.
    #[error("invalid magic bytes: expected RSU0")]
    InvalidMagic,

    /// The frame body failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Encoding or decoding of a frame body failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A transition or message violated the session protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<Box<bincode::ErrorKind>> for CaptureError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CaptureError::Encoding(e.to_string())
    }
}
