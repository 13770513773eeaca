//! Wire envelopes exchanged with browser clients.
//!
//! Every frame is a JSON object with a `type` tag and snake_case routing
//! fields. Payloads are opaque to the relay except when it negotiates on a
//! peer's behalf; browsers send them as a JSON string holding JSON, so that
//! form is decoded first and emitted for anything the relay generates.

use crate::error::{RelayError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Join,
    Joined,
    Offer,
    Answer,
    Candidate,
    NewParticipant,
    GetParticipants,
    ParticipantLeft,
    ParticipantsList,
    Leave,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_value(self) {
            Ok(Value::String(tag)) => f.write_str(&tag),
            _ => Err(fmt::Error),
        }
    }
}

impl FromStr for MessageType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| RelayError::UnknownType(s.to_string()))
    }
}

/// Inbound shape; `type` stays a string so unknown tags can be told apart
/// from malformed JSON.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    sender_id: Option<String>,
    #[serde(default)]
    target_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    peers: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<String>>,
}

impl Envelope {
    pub fn new(kind: MessageType, room_id: &str, sender_id: &str) -> Self {
        Self {
            kind,
            room_id: Some(room_id.to_string()),
            sender_id: sender_id.to_string(),
            target_id: None,
            payload: None,
            peers: None,
        }
    }

    pub fn joined(room_id: &str, peer_id: &str) -> Self {
        Self::new(MessageType::Joined, room_id, peer_id)
    }

    pub fn new_participant(room_id: &str, peer_id: &str) -> Self {
        Self::new(MessageType::NewParticipant, room_id, peer_id)
    }

    pub fn participant_left(room_id: &str, peer_id: &str) -> Self {
        Self::new(MessageType::ParticipantLeft, room_id, peer_id)
    }

    pub fn participants_list(room_id: &str, peer_id: &str, peers: Vec<String>) -> Self {
        Self {
            peers: Some(peers),
            ..Self::new(MessageType::ParticipantsList, room_id, peer_id)
        }
    }

    /// Attaches `value` in the string-wrapped form browsers `JSON.parse`.
    pub fn with_payload<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.payload = Some(Value::String(serde_json::to_string(value)?));
        Ok(self)
    }

    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        Ok(Self {
            kind: raw.kind.parse()?,
            room_id: raw.room_id,
            sender_id: raw.sender_id.unwrap_or_default(),
            target_id: raw.target_id,
            payload: raw.payload,
            peers: raw.peers,
        })
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The room named by the envelope; empty strings count as absent.
    pub fn room(&self) -> Option<&str> {
        self.room_id.as_deref().filter(|id| !id.is_empty())
    }

    /// The addressed peer; empty strings count as absent.
    pub fn target(&self) -> Option<&str> {
        self.target_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Decodes the nested payload, accepting both a JSON-in-a-string and a
    /// bare JSON value.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.payload {
            None | Some(Value::Null) => Err(RelayError::MissingPayload),
            Some(Value::String(inner)) => Ok(serde_json::from_str(inner)?),
            Some(other) => Ok(serde_json::from_value(other.clone())?),
        }
    }
}
