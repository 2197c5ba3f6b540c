//! Event - the single envelope type carried by every frame.
//!
//! On the wire an event is `{"event": <kind>, "data": [<positional fields>]}`.
//! In Rust each kind is an enum variant with named, typed fields; decoding
//! goes through [`EventKind`] and checks the field count and types for that
//! kind before building the variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{ClientId, WireError};

/// Event kind discriminator, as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Relay tells a fresh connection its id
    Setup,
    /// Membership request / response
    Discover,
    /// Plaintext to everyone
    Broadcast,
    /// Plaintext to one peer
    Message,
    /// Ciphertext to one peer
    MessageEncrypted,
    /// Public key offer to one peer
    KeyExchangeRequest,
    /// Responder confirms it derived the shared secret
    KeyExchangeAck,
}

impl EventKind {
    /// All kinds, in table order.
    pub const ALL: [EventKind; 7] = [
        EventKind::Setup,
        EventKind::Discover,
        EventKind::Broadcast,
        EventKind::Message,
        EventKind::MessageEncrypted,
        EventKind::KeyExchangeRequest,
        EventKind::KeyExchangeAck,
    ];

    /// Wire spelling of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Setup => "setup",
            EventKind::Discover => "discover",
            EventKind::Broadcast => "broadcast",
            EventKind::Message => "message",
            EventKind::MessageEncrypted => "message-encrypted",
            EventKind::KeyExchangeRequest => "key-exchange-request",
            EventKind::KeyExchangeAck => "key-exchange-ack",
        }
    }

    /// Number of positional fields this kind carries.
    pub fn arity(&self) -> usize {
        match self {
            EventKind::Setup | EventKind::Discover => 1,
            EventKind::Broadcast | EventKind::KeyExchangeAck => 2,
            EventKind::Message | EventKind::MessageEncrypted | EventKind::KeyExchangeRequest => 3,
        }
    }

    /// Look up a kind by its wire spelling.
    pub fn parse(kind: &str) -> Result<Self, WireError> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == kind)
            .ok_or_else(|| WireError::UnknownEventKind(kind.to_string()))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `setup [client_id]`
    Setup {
        /// Id the relay assigned to this connection
        client_id: ClientId,
    },
    /// `discover [requester]`
    DiscoverRequest {
        /// Id of the client asking
        requester: ClientId,
    },
    /// `discover [[ids...]]`
    DiscoverResponse {
        /// Every registered id, the requester included
        clients: Vec<ClientId>,
    },
    /// `broadcast [sender, text]`
    Broadcast {
        /// Originating client, or [`ClientId::SERVER`]
        sender: ClientId,
        /// Message text
        text: String,
    },
    /// `message [sender, recipient, text]`
    Message {
        /// Originating client
        sender: ClientId,
        /// Destination client
        recipient: ClientId,
        /// Message text
        text: String,
    },
    /// `message-encrypted [sender, recipient, base64(iv || ciphertext)]`
    MessageEncrypted {
        /// Originating client
        sender: ClientId,
        /// Destination client
        recipient: ClientId,
        /// Opaque to the relay
        ciphertext: String,
    },
    /// `key-exchange-request [sender, recipient, base64(public key)]`
    KeyExchangeRequest {
        /// Client offering its key
        sender: ClientId,
        /// Client the offer is for
        recipient: ClientId,
        /// SEC1 public key, base64
        public_key: String,
    },
    /// `key-exchange-ack [requester, responder]`
    ///
    /// Routed to `requester`, the side that initiated the exchange.
    KeyExchangeAck {
        /// Handshake initiator
        requester: ClientId,
        /// Side that derived the secret and is acknowledging
        responder: ClientId,
    },
}

/// Untyped wire shape shared by all kinds.
#[derive(Debug, Serialize, Deserialize)]
struct RawEvent {
    event: String,
    data: Vec<Value>,
}

impl Event {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Setup { .. } => EventKind::Setup,
            Event::DiscoverRequest { .. } | Event::DiscoverResponse { .. } => EventKind::Discover,
            Event::Broadcast { .. } => EventKind::Broadcast,
            Event::Message { .. } => EventKind::Message,
            Event::MessageEncrypted { .. } => EventKind::MessageEncrypted,
            Event::KeyExchangeRequest { .. } => EventKind::KeyExchangeRequest,
            Event::KeyExchangeAck { .. } => EventKind::KeyExchangeAck,
        }
    }

    /// Serialize to the JSON frame body.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(&self.to_raw()).map_err(WireError::Serialization)
    }

    /// Deserialize from a JSON frame body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let raw: RawEvent = serde_json::from_slice(bytes)
            .map_err(|e| WireError::MalformedFrame(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn to_raw(&self) -> RawEvent {
        let id = |id: &ClientId| Value::String(id.to_string());
        let text = |s: &str| Value::String(s.to_string());

        let data = match self {
            Event::Setup { client_id } => vec![id(client_id)],
            Event::DiscoverRequest { requester } => vec![id(requester)],
            Event::DiscoverResponse { clients } => {
                vec![Value::Array(clients.iter().map(id).collect())]
            }
            Event::Broadcast { sender, text: t } => vec![id(sender), text(t)],
            Event::Message {
                sender,
                recipient,
                text: t,
            } => vec![id(sender), id(recipient), text(t)],
            Event::MessageEncrypted {
                sender,
                recipient,
                ciphertext,
            } => vec![id(sender), id(recipient), text(ciphertext)],
            Event::KeyExchangeRequest {
                sender,
                recipient,
                public_key,
            } => vec![id(sender), id(recipient), text(public_key)],
            Event::KeyExchangeAck {
                requester,
                responder,
            } => vec![id(requester), id(responder)],
        };

        RawEvent {
            event: self.kind().as_str().to_string(),
            data,
        }
    }

    fn from_raw(raw: RawEvent) -> Result<Self, WireError> {
        let kind = EventKind::parse(&raw.event)?;
        let data = raw.data;

        if data.len() != kind.arity() {
            return Err(WireError::MalformedFrame(format!(
                "{} expects {} fields, got {}",
                kind,
                kind.arity(),
                data.len()
            )));
        }

        let event = match kind {
            EventKind::Setup => Event::Setup {
                client_id: id_at(kind, &data, 0)?,
            },
            // The request carries the requester's id, the response an array.
            EventKind::Discover => match &data[0] {
                Value::Array(items) => Event::DiscoverResponse {
                    clients: items
                        .iter()
                        .map(|v| parse_id(kind, v))
                        .collect::<Result<_, _>>()?,
                },
                _ => Event::DiscoverRequest {
                    requester: id_at(kind, &data, 0)?,
                },
            },
            EventKind::Broadcast => Event::Broadcast {
                sender: id_at(kind, &data, 0)?,
                text: string_at(kind, &data, 1)?,
            },
            EventKind::Message => Event::Message {
                sender: id_at(kind, &data, 0)?,
                recipient: id_at(kind, &data, 1)?,
                text: string_at(kind, &data, 2)?,
            },
            EventKind::MessageEncrypted => Event::MessageEncrypted {
                sender: id_at(kind, &data, 0)?,
                recipient: id_at(kind, &data, 1)?,
                ciphertext: string_at(kind, &data, 2)?,
            },
            EventKind::KeyExchangeRequest => Event::KeyExchangeRequest {
                sender: id_at(kind, &data, 0)?,
                recipient: id_at(kind, &data, 1)?,
                public_key: string_at(kind, &data, 2)?,
            },
            EventKind::KeyExchangeAck => Event::KeyExchangeAck {
                requester: id_at(kind, &data, 0)?,
                responder: id_at(kind, &data, 1)?,
            },
        };

        Ok(event)
    }
}

fn string_at(kind: EventKind, data: &[Value], index: usize) -> Result<String, WireError> {
    match data.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(WireError::MalformedFrame(format!(
            "{} field {} must be a string, got {}",
            kind, index, other
        ))),
        None => Err(WireError::MalformedFrame(format!(
            "{} field {} missing",
            kind, index
        ))),
    }
}

fn id_at(kind: EventKind, data: &[Value], index: usize) -> Result<ClientId, WireError> {
    match data.get(index) {
        Some(value) => parse_id(kind, value),
        None => Err(WireError::MalformedFrame(format!(
            "{} field {} missing",
            kind, index
        ))),
    }
}

fn parse_id(kind: EventKind, value: &Value) -> Result<ClientId, WireError> {
    let Value::String(s) = value else {
        return Err(WireError::MalformedFrame(format!(
            "{} client id must be a string, got {}",
            kind, value
        )));
    };
    s.parse()
        .map_err(|e| WireError::MalformedFrame(format!("{} invalid client id {:?}: {}", kind, s, e)))
}
