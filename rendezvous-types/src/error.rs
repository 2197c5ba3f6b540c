//! Error types for the rendezvous wire format.

use thiserror::Error;

/// Errors produced while encoding or decoding frames.
///
/// `MalformedFrame` and `UnknownEventKind` concern a single frame and leave
/// the stream usable. `FrameTooLarge` and `Io` mean the stream itself is gone.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame body is not a valid event (bad JSON, wrong arity, wrong types).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame body carries an event kind this protocol does not define.
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    /// Declared frame length exceeds the configured maximum.
    #[error("frame too large: {size} bytes (limit: {limit} bytes)")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Underlying stream error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether the error is confined to one frame (the stream can continue).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WireError::MalformedFrame(_) | WireError::UnknownEventKind(_)
        )
    }
}
