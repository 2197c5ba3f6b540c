//! Per-peer key exchange.
//!
//! Each peer moves through `Unknown → KeSent → Established`. The coordinator
//! performs no I/O: every input returns the events the caller must send.
//!
//! ```text
//!  A                          relay                          B
//!  │ key-exchange-request(A,B,pubA) ──────────────────────►  │ derive, store
//!  │  ◄──────────────────────────── key-exchange-ack(A,B)    │
//!  │  ◄──────────────────── key-exchange-request(B,A,pubB)   │
//!  │ derive, store                                           │
//!  │ key-exchange-ack(B,A) ───────────────────────────────►  │
//! ```
//!
//! When both sides initiate at once, both derive the same key from the
//! other's request; the [`KeyStore`] admits only the first.

use crate::crypto::{CryptoError, KeyPair};
use crate::keystore::KeyStore;
use rendezvous_types::{ClientId, Event};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default time a sent request may stay unanswered before it is retried.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake errors.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Could not derive a key from the peer's public key.
    #[error("key exchange with {peer} failed: {source}")]
    CryptoFailure {
        /// Peer whose key was rejected.
        peer: ClientId,
        /// Underlying crypto error.
        #[source]
        source: CryptoError,
    },
}

/// Handshake progress with one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No exchange in flight.
    Unknown,
    /// Our request is out, no reply yet.
    KeSent {
        /// When the request was emitted.
        since: Instant,
    },
    /// Exchange completed from our side.
    Established,
}

/// Drives key exchange with every peer for one client.
#[derive(Debug)]
pub struct HandshakeCoordinator {
    me: ClientId,
    keypair: Arc<KeyPair>,
    keys: Arc<KeyStore>,
    phases: HashMap<ClientId, Phase>,
    timeout: Duration,
}

impl HandshakeCoordinator {
    /// Create a coordinator for client `me`.
    pub fn new(me: ClientId, keypair: Arc<KeyPair>, keys: Arc<KeyStore>) -> Self {
        Self {
            me,
            keypair,
            keys,
            phases: HashMap::new(),
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Set how long a request may go unanswered before it is retried.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current phase for `peer`.
    pub fn phase(&self, peer: &ClientId) -> Phase {
        self.phases.get(peer).copied().unwrap_or(Phase::Unknown)
    }

    /// A discovery listing arrived: start an exchange with every new peer.
    pub fn on_discover(&mut self, peers: &[ClientId]) -> Vec<Event> {
        self.on_discover_at(peers, Instant::now())
    }

    fn on_discover_at(&mut self, peers: &[ClientId], now: Instant) -> Vec<Event> {
        let mut out = Vec::new();
        for &peer in peers {
            if peer == self.me || peer.is_server() || self.keys.contains(&peer) {
                continue;
            }
            if let Phase::KeSent { since } = self.phase(&peer) {
                if now.saturating_duration_since(since) < self.timeout {
                    continue;
                }
                tracing::debug!(%peer, "Key exchange timed out, retrying");
            }

            out.push(self.request_to(peer));
            self.phases.insert(peer, Phase::KeSent { since: now });
        }
        out
    }

    /// A peer offered its public key.
    ///
    /// On success returns the ack followed by our own request, which lets the
    /// initiator derive the same key.
    pub fn on_request(
        &mut self,
        from: ClientId,
        to: ClientId,
        public_key: &str,
    ) -> Result<Vec<Event>, HandshakeError> {
        if to != self.me || from == self.me {
            tracing::debug!(%from, %to, "Ignoring key exchange not addressed to us");
            return Ok(Vec::new());
        }
        if self.keys.contains(&from) {
            tracing::debug!(peer = %from, "Key already established, ignoring request");
            return Ok(Vec::new());
        }

        let key = match self.keypair.derive_shared(public_key) {
            Ok(key) => key,
            Err(source) => {
                self.phases.remove(&from);
                return Err(HandshakeError::CryptoFailure { peer: from, source });
            }
        };

        // Stored before the ack goes out.
        if !self.keys.insert_if_absent(from, key) {
            return Ok(Vec::new());
        }
        self.phases.insert(from, Phase::Established);
        tracing::info!(peer = %from, "Shared key established");

        Ok(vec![
            Event::KeyExchangeAck {
                requester: from,
                responder: self.me,
            },
            self.request_to(from),
        ])
    }

    /// A peer acknowledged our request.
    pub fn on_ack(&mut self, requester: ClientId, responder: ClientId) {
        if requester == self.me {
            self.phases.insert(responder, Phase::Established);
        }
    }

    fn request_to(&self, peer: ClientId) -> Event {
        Event::KeyExchangeRequest {
            sender: self.me,
            recipient: peer,
            public_key: self.keypair.public_key_base64().to_string(),
        }
    }
}
