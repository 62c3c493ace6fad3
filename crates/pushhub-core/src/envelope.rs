//! Events and their backplane wire envelope.
//!
//! An [`Event`] is a [`Target`] plus an opaque string payload. On the wire it
//! travels as a two-field JSON object:
//!
//! ```json
//! {"target": "alice", "payload": "hi"}
//! {"target": null, "payload": "tick"}
//! ```
//!
//! A `null`, absent or empty `target` denotes broadcast. Every process decodes
//! the same bytes into the same event, so the envelope is the only contract
//! between publishers and subscribers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::EnvelopeError;
use crate::ids::ClientId;

/// Who an event is addressed to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every connection registered at local-delivery time.
    Broadcast,
    /// Every connection of one client.
    Client(ClientId),
}

impl Target {
    /// Target a single client. An empty identifier means broadcast, the same
    /// as it does on the wire.
    pub fn client(id: impl Into<ClientId>) -> Self {
        let id = id.into();
        if id.is_empty() {
            Self::Broadcast
        } else {
            Self::Client(id)
        }
    }

    /// Build a target from an optional client identifier. `None` and the
    /// empty string both mean broadcast.
    #[must_use]
    pub fn from_optional(client_id: Option<&str>) -> Self {
        match client_id {
            Some(id) if !id.is_empty() => Self::client(id),
            _ => Self::Broadcast,
        }
    }

    /// Whether this target addresses every connection.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast)
    }

    /// The addressed client, if this is a targeted event.
    #[must_use]
    pub fn client_id(&self) -> Option<&ClientId> {
        match self {
            Self::Broadcast => None,
            Self::Client(id) if id.is_empty() => None,
            Self::Client(id) => Some(id),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.client_id() {
            None => f.write_str("broadcast"),
            Some(id) => write!(f, "client:{id}"),
        }
    }
}

/// A message to be pushed to connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Who receives the payload.
    pub target: Target,
    /// Opaque payload, written verbatim into each event frame.
    pub payload: String,
}

/// Borrowed wire form used for encoding.
#[derive(Serialize)]
struct WireEnvelopeRef<'a> {
    target: Option<&'a str>,
    payload: &'a str,
}

/// Owned wire form used for decoding.
#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    target: Option<String>,
    payload: String,
}

impl Event {
    /// Create an event.
    pub fn new(target: Target, payload: impl Into<String>) -> Self {
        Self {
            target,
            payload: payload.into(),
        }
    }

    /// Create a broadcast event.
    pub fn broadcast(payload: impl Into<String>) -> Self {
        Self::new(Target::Broadcast, payload)
    }

    /// Create an event for one client.
    pub fn to_client(client_id: impl Into<ClientId>, payload: impl Into<String>) -> Self {
        Self::new(Target::client(client_id), payload)
    }

    /// Serialize into the backplane envelope.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let wire = WireEnvelopeRef {
            target: self.target.client_id().map(ClientId::as_str),
            payload: &self.payload,
        };
        serde_json::to_vec(&wire).map_err(EnvelopeError::Encode)
    }

    /// Deserialize a backplane envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes).map_err(EnvelopeError::Decode)?;
        Ok(Self {
            target: Target::from_optional(wire.target.as_deref()),
            payload: wire.payload,
        })
    }
}
