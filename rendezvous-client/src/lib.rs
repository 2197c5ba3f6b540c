//! # rendezvous-client
//!
//! Client library for the rendezvous relay.
//!
//! The relay only forwards frames; everything private happens here.
//!
//! ## Features
//!
//! - **Discovery**: list the clients connected to the relay
//! - **Key Agreement**: P-256 ECDH with every discovered peer, no leader election
//! - **Direct Messages**: plaintext, or AES-256-CBC under the pairwise key
//! - **Transport Abstraction**: Pluggable transport layer (TCP, mock)
//!
//! ## Security
//!
//! The ECDH output is used directly as the AES key and CBC carries no MAC.
//! Ciphertexts are confidential but not authenticated: a relay that flips
//! bits goes undetected unless padding breaks.
//!
//! ## Example
//!
//! ```ignore
//! use rendezvous_client::{ClientConfig, ClientEvent, RendezvousClient};
//!
//! let client = RendezvousClient::tcp(ClientConfig::new("localhost:3000"));
//! let me = client.connect().await?;
//! client.discover().await?;
//!
//! loop {
//!     match client.next_event().await? {
//!         ClientEvent::KeyEstablished { peer } => {
//!             client.send_encrypted(peer, "hello").await?;
//!         }
//!         other => println!("{other:?}"),
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod crypto;
pub mod handshake;
pub mod keystore;
pub mod transport;

pub use client::{ClientConfig, ClientError, ClientEvent, RendezvousClient};
pub use crypto::{CryptoError, KeyPair, SharedKey, IV_SIZE, KEY_SIZE, PUBLIC_KEY_SIZE};
pub use handshake::{HandshakeCoordinator, HandshakeError, Phase};
pub use keystore::KeyStore;
pub use transport::{MockTransport, TcpTransport, Transport, TransportError};
