//! RendezvousClient - the main interface for talking to a relay.
//!
//! [`RendezvousClient`] owns the transport, this client's key pair, the
//! per-peer [`KeyStore`] and the [`HandshakeCoordinator`]. Inbound frames are
//! processed by [`RendezvousClient::next_event`], which answers key exchange
//! traffic itself and surfaces everything a user should see as a
//! [`ClientEvent`].
//!
//! ```text
//! Application → RendezvousClient → Transport → relay
//!                     ↓
//!          HandshakeCoordinator / KeyStore
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rendezvous_client::{ClientConfig, RendezvousClient};
//!
//! let client = RendezvousClient::tcp(ClientConfig::new("localhost:3000"));
//! client.connect().await?;
//! client.discover().await?;
//! while let Ok(event) = client.next_event().await {
//!     println!("{event:?}");
//! }
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use rendezvous_types::{ClientId, Event, EventKind, Frame, WireError, DEFAULT_MAX_FRAME_SIZE};

use crate::crypto::{CryptoError, KeyPair};
use crate::handshake::{HandshakeCoordinator, HandshakeError, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::keystore::KeyStore;
use crate::transport::{TcpTransport, Transport, TransportError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame from the relay could not be decoded or encoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Key exchange failed.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Not connected to relay.
    #[error("not connected")]
    NotConnected,

    /// No shared key has been established with this peer yet.
    #[error("no shared key for {0}")]
    NoSharedKey(ClientId),

    /// The relay sent an event that makes no sense at this point.
    #[error("unexpected {0} event")]
    UnexpectedEvent(EventKind),

    /// Relay did not answer in time.
    #[error("timed out waiting for relay")]
    Timeout,
}

impl ClientError {
    /// Whether the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::NotConnected)
    }
}

/// Configuration for a rendezvous client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay address (`host:port`).
    pub server_address: String,
    /// How long a key exchange request may stay unanswered before retrying.
    pub handshake_timeout: Duration,
    /// Bound on connecting plus receiving the setup event.
    pub connect_timeout: Duration,
    /// Largest frame accepted from the relay.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("localhost:3000")
    }
}

impl ClientConfig {
    /// Create config for the relay at `server_address`.
    pub fn new(server_address: &str) -> Self {
        Self {
            server_address: server_address.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the handshake retry timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum inbound frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

/// Something the user should see.
///
/// Key exchange traffic is handled internally; only its outcome is reported.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Discovery listing, as sent by the relay (includes this client).
    Peers(Vec<ClientId>),
    /// Broadcast text. `from` is [`ClientId::SERVER`] for relay notices.
    Broadcast {
        /// Sender.
        from: ClientId,
        /// Message text.
        text: String,
    },
    /// Plaintext direct message.
    Message {
        /// Sender.
        from: ClientId,
        /// Message text.
        text: String,
    },
    /// Direct message that arrived encrypted and was decrypted.
    EncryptedMessage {
        /// Sender.
        from: ClientId,
        /// Decrypted text.
        text: String,
    },
    /// A shared key with `peer` is now available.
    KeyEstablished {
        /// The peer.
        peer: ClientId,
    },
}

impl std::fmt::Debug for ClientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientEvent::Peers(peers) => f.debug_tuple("Peers").field(peers).finish(),
            ClientEvent::Broadcast { from, text } => f
                .debug_struct("Broadcast")
                .field("from", from)
                .field("text", text)
                .finish(),
            ClientEvent::Message { from, text } => f
                .debug_struct("Message")
                .field("from", from)
                .field("text", text)
                .finish(),
            ClientEvent::EncryptedMessage { from, text } => f
                .debug_struct("EncryptedMessage")
                .field("from", from)
                .field("text", &format!("[{} bytes]", text.len()))
                .finish(),
            ClientEvent::KeyEstablished { peer } => f
                .debug_struct("KeyEstablished")
                .field("peer", peer)
                .finish(),
        }
    }
}

/// Client connection to a rendezvous relay.
///
/// All methods take `&self`; share it behind an `Arc` to run
/// [`next_event`](Self::next_event) and user commands from different tasks.
pub struct RendezvousClient<T: Transport> {
    config: ClientConfig,
    transport: T,
    keypair: Arc<KeyPair>,
    keys: Arc<KeyStore>,
    id: OnceLock<ClientId>,
    handshake: Mutex<Option<HandshakeCoordinator>>,
}

impl<T: Transport> std::fmt::Debug for RendezvousClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendezvousClient")
            .field("server_address", &self.config.server_address)
            .field("id", &self.id.get())
            .field("keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl RendezvousClient<TcpTransport> {
    /// Create a TCP client honouring `config.max_frame_size`.
    pub fn tcp(config: ClientConfig) -> Self {
        let transport = TcpTransport::with_max_frame_size(config.max_frame_size);
        Self::new(config, transport)
    }
}

impl<T: Transport> RendezvousClient<T> {
    /// Create a client with a fresh key pair.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            keypair: Arc::new(KeyPair::generate()),
            keys: Arc::new(KeyStore::new()),
            id: OnceLock::new(),
            handshake: Mutex::new(None),
        }
    }

    /// Connect to the relay and wait for the setup event.
    ///
    /// Returns the id the relay assigned.
    pub async fn connect(&self) -> Result<ClientId, ClientError> {
        let limit = self.config.connect_timeout;
        let id = tokio::time::timeout(limit, self.connect_inner())
            .await
            .map_err(|_| ClientError::Timeout)??;
        tracing::info!(%id, "Connected to {}", self.config.server_address);
        Ok(id)
    }

    async fn connect_inner(&self) -> Result<ClientId, ClientError> {
        self.transport.connect(&self.config.server_address).await?;

        let id = match self.transport.recv().await?.event()? {
            Event::Setup { client_id } => client_id,
            other => return Err(ClientError::UnexpectedEvent(other.kind())),
        };

        // A reconnect keeps the first id; peers hold keys under it.
        let id = *self.id.get_or_init(|| id);
        let mut handshake = self.handshake.lock().await;
        if handshake.is_none() {
            *handshake = Some(
                HandshakeCoordinator::new(id, self.keypair.clone(), self.keys.clone())
                    .with_timeout(self.config.handshake_timeout),
            );
        }
        Ok(id)
    }

    /// Id assigned by the relay, once connected.
    pub fn id(&self) -> Option<ClientId> {
        self.id.get().copied()
    }

    fn require_id(&self) -> Result<ClientId, ClientError> {
        self.id().ok_or(ClientError::NotConnected)
    }

    /// Check if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// This client's public key (base64 SEC1).
    pub fn public_key(&self) -> &str {
        self.keypair.public_key_base64()
    }

    /// Whether a shared key with `peer` exists.
    pub fn has_key(&self, peer: &ClientId) -> bool {
        self.keys.contains(peer)
    }

    /// Peers with an established shared key.
    pub fn peers_with_keys(&self) -> Vec<ClientId> {
        self.keys.peers()
    }

    /// Ask the relay for the list of connected clients.
    ///
    /// The reply arrives through [`next_event`](Self::next_event) and also
    /// starts key exchange with every listed peer.
    pub async fn discover(&self) -> Result<(), ClientError> {
        let requester = self.require_id()?;
        self.send_event(&Event::DiscoverRequest { requester }).await
    }

    /// Send `text` to every connected client (including this one).
    pub async fn broadcast(&self, text: &str) -> Result<(), ClientError> {
        let sender = self.require_id()?;
        self.send_event(&Event::Broadcast {
            sender,
            text: text.to_string(),
        })
        .await
    }

    /// Send plaintext `text` to `recipient` via the relay.
    pub async fn send_message(&self, recipient: ClientId, text: &str) -> Result<(), ClientError> {
        let sender = self.require_id()?;
        self.send_event(&Event::Message {
            sender,
            recipient,
            text: text.to_string(),
        })
        .await
    }

    /// Encrypt `text` with the key shared with `recipient` and send it.
    ///
    /// Fails with [`ClientError::NoSharedKey`] before anything is sent if no
    /// key exchange with `recipient` has completed.
    pub async fn send_encrypted(&self, recipient: ClientId, text: &str) -> Result<(), ClientError> {
        let sender = self.require_id()?;
        let key = self
            .keys
            .get(&recipient)
            .ok_or(ClientError::NoSharedKey(recipient))?;
        let ciphertext = key.encrypt(text.as_bytes())?;
        self.send_event(&Event::MessageEncrypted {
            sender,
            recipient,
            ciphertext,
        })
        .await
    }

    /// Wait for the next event worth showing to the user.
    ///
    /// Handles key exchange traffic along the way. Bad frames, failed
    /// decryption and similar problems are logged and skipped; only errors
    /// that leave the connection unusable are returned.
    pub async fn next_event(&self) -> Result<ClientEvent, ClientError> {
        loop {
            let frame = self.transport.recv().await?;
            match self.handle_frame(frame).await {
                Ok(Some(event)) => return Ok(event),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!("Ignoring frame from relay: {}", e),
            }
        }
    }

    /// Process one inbound frame.
    async fn handle_frame(&self, frame: Frame) -> Result<Option<ClientEvent>, ClientError> {
        let event = frame.event()?;
        tracing::debug!(kind = %event.kind(), "Received event");

        match event {
            Event::DiscoverResponse { clients } => {
                let requests = self.with_handshake(|hs| hs.on_discover(&clients)).await?;
                self.send_all(&requests).await?;
                Ok(Some(ClientEvent::Peers(clients)))
            }
            Event::Broadcast { sender, text } => Ok(Some(ClientEvent::Broadcast {
                from: sender,
                text,
            })),
            Event::Message { sender, text, .. } => Ok(Some(ClientEvent::Message {
                from: sender,
                text,
            })),
            Event::MessageEncrypted {
                sender, ciphertext, ..
            } => {
                let key = self
                    .keys
                    .get(&sender)
                    .ok_or(ClientError::NoSharedKey(sender))?;
                let plaintext = key.decrypt(&ciphertext)?;
                Ok(Some(ClientEvent::EncryptedMessage {
                    from: sender,
                    text: String::from_utf8_lossy(&plaintext).into_owned(),
                }))
            }
            Event::KeyExchangeRequest {
                sender,
                recipient,
                public_key,
            } => {
                let had_key = self.keys.contains(&sender);
                let replies = self
                    .with_handshake(|hs| hs.on_request(sender, recipient, &public_key))
                    .await??;
                self.send_all(&replies).await?;
                if !had_key && self.keys.contains(&sender) {
                    Ok(Some(ClientEvent::KeyEstablished { peer: sender }))
                } else {
                    Ok(None)
                }
            }
            Event::KeyExchangeAck {
                requester,
                responder,
            } => {
                self.with_handshake(|hs| hs.on_ack(requester, responder))
                    .await?;
                Ok(None)
            }
            other @ (Event::Setup { .. } | Event::DiscoverRequest { .. }) => {
                Err(ClientError::UnexpectedEvent(other.kind()))
            }
        }
    }

    /// Run `f` against the handshake state. The lock is released before
    /// returning so no I/O happens under it.
    async fn with_handshake<R>(
        &self,
        f: impl FnOnce(&mut HandshakeCoordinator) -> R,
    ) -> Result<R, ClientError> {
        let mut guard = self.handshake.lock().await;
        let hs = guard.as_mut().ok_or(ClientError::NotConnected)?;
        Ok(f(hs))
    }

    async fn send_all(&self, events: &[Event]) -> Result<(), ClientError> {
        for event in events {
            self.send_event(event).await?;
        }
        Ok(())
    }

    async fn send_event(&self, event: &Event) -> Result<(), ClientError> {
        let frame = Frame::from_event(event)?;
        self.transport.send(frame).await?;
        Ok(())
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.transport.close().await?;
        Ok(())
    }

    /// Get a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}
