//! Signaling wire protocol.
//!
//! Clients exchange JSON objects with a `type` field of `offer`, `answer` or
//! `ice_candidate`. All other fields (`sdp`, `candidate`, `sdpMid`,
//! `sdpMLineIndex`, ...) are opaque to the relay and forwarded verbatim.
//!
//! Copies published to the bus carry one extra field, [`SENDER_FIELD`],
//! naming the connection that produced them. It is stripped by the bridge
//! before any client sees the payload.

use crate::errors::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Close code sent when authentication or authorization fails.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// Close code sent to a host connection replaced by a newer host.
pub const CLOSE_HOST_REPLACED: u16 = 1000;

/// Field carrying the sender tag on bus copies of signaling messages.
pub const SENDER_FIELD: &str = "_sender";

/// Longest accepted room identifier, in bytes.
pub const MAX_ROOM_ID_BYTES: usize = 128;

/// Connection role within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The monitored device offering its screen.
    Host,
    /// An administrator viewing the host.
    Viewer,
}

impl Role {
    /// Lowercase name, also used as a metric label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Viewer => "viewer",
        }
    }
}

impl FromStr for Role {
    type Err = RelayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "host" => Ok(Role::Host),
            "viewer" => Ok(Role::Viewer),
            _ => Err(RelayError::BadRequest(
                "role must be 'host' or 'viewer'".to_string(),
            )),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signaling message kinds the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Map a `type` field value to a kind. Unknown values return `None`.
    #[must_use]
    pub fn from_type(value: &str) -> Option<Self> {
        match value {
            "offer" => Some(SignalKind::Offer),
            "answer" => Some(SignalKind::Answer),
            "ice_candidate" => Some(SignalKind::IceCandidate),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice_candidate",
        }
    }
}

/// A parsed signaling message.
///
/// The original JSON object is kept as-is so fields the relay does not know
/// about survive the round trip through the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEnvelope {
    kind: SignalKind,
    fields: Map<String, Value>,
}

impl SignalEnvelope {
    /// Parse an inbound text frame.
    ///
    /// Returns `Ok(None)` for well-formed objects whose `type` is not a
    /// signaling kind; callers log and skip those.
    ///
    /// # Errors
    ///
    /// `MalformedMessage` if the frame is not a JSON object with a string
    /// `type` field.
    pub fn parse(text: &str) -> Result<Option<Self>, RelayError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RelayError::MalformedMessage(format!("invalid JSON: {e}")))?;

        let Value::Object(fields) = value else {
            return Err(RelayError::MalformedMessage(
                "message is not a JSON object".to_string(),
            ));
        };

        let Some(type_name) = fields.get("type").and_then(Value::as_str) else {
            return Err(RelayError::MalformedMessage(
                "missing string field 'type'".to_string(),
            ));
        };

        Ok(SignalKind::from_type(type_name).map(|kind| Self { kind, fields }))
    }

    #[must_use]
    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Attach the sender tag, replacing any value a client supplied.
    pub fn tag(&mut self, sender: &str) {
        self.fields
            .insert(SENDER_FIELD.to_string(), Value::String(sender.to_string()));
    }

    /// Remove the sender tag and return it, if it was a string.
    pub fn untag(&mut self) -> Option<String> {
        match self.fields.remove(SENDER_FIELD) {
            Some(Value::String(sender)) => Some(sender),
            _ => None,
        }
    }

    /// Serialize back to a JSON text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }

    /// Consume the envelope, serializing it to a JSON text frame.
    #[must_use]
    pub fn into_json(self) -> String {
        Value::Object(self.fields).to_string()
    }
}

/// Validate a client-supplied room identifier.
///
/// Room ids become part of a bus channel name, so characters that are glob
/// metacharacters in pattern subscriptions are refused.
///
/// # Errors
///
/// `BadRequest` describing the first violated rule.
pub fn validate_room_id(room_id: &str) -> Result<(), RelayError> {
    if room_id.is_empty() {
        return Err(RelayError::BadRequest("room_id is empty".to_string()));
    }
    if room_id.len() > MAX_ROOM_ID_BYTES {
        return Err(RelayError::BadRequest(format!(
            "room_id exceeds {MAX_ROOM_ID_BYTES} bytes"
        )));
    }
    if room_id
        .chars()
        .any(|c| c.is_control() || c.is_whitespace())
    {
        return Err(RelayError::BadRequest(
            "room_id contains whitespace or control characters".to_string(),
        ));
    }
    if room_id.contains(['*', '?', '[', ']']) {
        return Err(RelayError::BadRequest(
            "room_id contains reserved characters".to_string(),
        ));
    }
    Ok(())
}
