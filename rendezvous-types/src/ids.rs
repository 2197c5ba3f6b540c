//! Identity types for the rendezvous protocol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An opaque identifier for one live client connection.
///
/// Assigned by the relay on accept (UUID v4), displayed and transmitted as
/// hyphenated UUID text. The nil UUID is reserved for the relay itself.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    /// The sentinel id used as sender of relay-authored broadcasts.
    pub const SERVER: ClientId = ClientId(uuid::Uuid::nil());

    /// Create a new random ClientId.
    ///
    /// Never returns the sentinel.
    pub fn random() -> Self {
        loop {
            let id = uuid::Uuid::new_v4();
            if !id.is_nil() {
                return Self(id);
            }
        }
    }

    /// Create a ClientId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this ClientId.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Whether this is the relay sentinel.
    pub fn is_server(&self) -> bool {
        self.0.is_nil()
    }
}

impl From<uuid::Uuid> for ClientId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s.trim()).map(Self)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", &self.to_string()[..8])
    }
}
