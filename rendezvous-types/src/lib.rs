//! # rendezvous-types
//!
//! Wire format types for the rendezvous relay protocol.
//!
//! This crate provides the foundational types shared by the relay and clients:
//! - [`ClientId`] - Per-connection identity, with the [`ClientId::SERVER`] sentinel
//! - [`Event`] / [`EventKind`] - The envelope and its closed set of kinds
//! - [`Frame`] / [`EventCodec`] - Length-prefixed framing for tokio streams
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codec;
mod error;
mod event;
mod ids;

pub use codec::{EventCodec, Frame, DEFAULT_MAX_FRAME_SIZE, LENGTH_FIELD_SIZE};
pub use error::WireError;
pub use event::{Event, EventKind};
pub use ids::ClientId;
