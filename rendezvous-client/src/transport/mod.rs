//! Transport abstraction for rendezvous clients.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (TCP, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and frame-oriented:
//! - `connect()` establishes a connection
//! - `send()` writes one frame
//! - `recv()` reads one frame
//! - `close()` gracefully terminates
//!
//! `send` and `recv` may be called concurrently from different tasks; a
//! pending `recv` does not block `send` or `close`.
//!
//! # Example
//!
//! ```ignore
//! let transport = TcpTransport::new();
//! transport.connect("localhost:3000").await?;
//! transport.send(Frame::from_event(&event)?).await?;
//! let frame = transport.recv().await?;
//! ```

mod mock;
mod tcp;

pub use mock::MockTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use rendezvous_types::{Frame, WireError};
use thiserror::Error;

/// Transport errors.
///
/// Any of these ends the connection from the client's point of view.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Stream lost framing (over-limit length prefix).
    #[error("framing error: {0}")]
    Framing(#[from] WireError),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for exchanging frames with the relay.
///
/// Implementations handle the underlying connection mechanism
/// (TCP, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the relay at `address` (`host:port` for TCP).
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one frame.
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Receive the next frame.
    ///
    /// Blocks until a frame arrives or the connection closes.
    async fn recv(&self) -> Result<Frame, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
