//! # rendezvous-relay
//!
//! Rendezvous relay server.
//!
//! This crate implements a relay server that:
//! - Accepts TCP connections and assigns each one a [`ClientId`](rendezvous_types::ClientId)
//! - Answers discovery with the list of connected clients
//! - Routes frames to their addressee, or to everyone for broadcasts
//! - Never sees plaintext of encrypted messages (relay is a "dumb pipe")
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │  length-prefixed   │
//!            ├──── JSON frames ──►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │      rendezvous-relay      │
//!        │  ┌─────────────────────┐   │
//!        │  │ ConnectionRegistry  │   │
//!        │  └─────────────────────┘   │
//!        └────────────────────────────┘
//! ```
//!
//! ## Routing
//!
//! - `discover` → reply to the requester with every registered id
//! - `broadcast` → every registered client, sender included
//! - `message`, `message-encrypted`, `key-exchange-request` → `data[1]`
//! - `key-exchange-ack` → `data[0]`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod limits;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod stats;

pub use config::RelayConfig;
pub use error::{RelayError, RouteError};
pub use server::{RelayServer, RendezvousRelay};
