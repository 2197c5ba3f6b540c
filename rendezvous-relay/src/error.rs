//! Error types for rendezvous-relay.

use rendezvous_types::{ClientId, EventKind, WireError};

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Wire format error on a connection.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The id is already registered.
    #[error("client already registered: {0}")]
    DuplicateClient(ClientId),
}

/// Reasons a received frame was not delivered.
///
/// None of these close the sender's connection.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// Body is not a valid event.
    #[error("malformed frame from {from}: {reason}")]
    Malformed {
        /// Connection the frame arrived on.
        from: ClientId,
        /// Decoder message.
        reason: String,
    },

    /// Body names an event kind the relay does not route.
    #[error("unknown event kind from {from}: {kind}")]
    UnknownKind {
        /// Connection the frame arrived on.
        from: ClientId,
        /// The kind string as received.
        kind: String,
    },

    /// The addressed client is not connected.
    #[error("recipient not found: {recipient} ({kind} from {from})")]
    RecipientNotFound {
        /// Connection the frame arrived on.
        from: ClientId,
        /// Addressed client.
        recipient: ClientId,
        /// Kind of the dropped frame.
        kind: EventKind,
    },

    /// A reply would exceed the frame limit and could never be written.
    #[error("reply to {from} too large: {size} bytes (limit: {limit} bytes)")]
    ReplyTooLarge {
        /// Connection the request arrived on.
        from: ClientId,
        /// Encoded reply size.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// A kind clients must not send (setup, discover response).
    #[error("unexpected {kind} from {from}")]
    Unexpected {
        /// Connection the frame arrived on.
        from: ClientId,
        /// Kind of the dropped frame.
        kind: EventKind,
    },
}

impl RouteError {
    /// Build from a decode failure on a frame received from `from`.
    pub fn from_wire(from: ClientId, err: WireError) -> Self {
        match err {
            WireError::UnknownEventKind(kind) => RouteError::UnknownKind { from, kind },
            other => RouteError::Malformed {
                from,
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
