//! Sync Protocol Events
//!
//! Every event travels as a flat JSON object: a `type` discriminator, a
//! global-time `timestamp`, and the variant's own fields. Optional fields are
//! omitted when absent and decode to `None` when missing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::state::SessionState;

/// Wire tags accepted by [`SyncEvent::decode`]
const KNOWN_TYPES: &[&str] = &[
    "play",
    "pause",
    "seek",
    "request_state",
    "join",
    "state_sync",
    "ping",
    "pong",
];

fn default_speed() -> f64 {
    1.0
}

/// Failure to turn a payload back into an event
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Payload is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing or non-string `type` field")]
    MissingType,

    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Invalid `{kind}` event: {reason}")]
    InvalidEvent { kind: String, reason: String },
}

/// Failure to serialize an event
#[derive(Debug, Error)]
#[error("Failed to encode event: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Messages exchanged between peers for synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    // === Playback (authoritative from the host, requests from participants) ===
    /// Start `media_id` at `start_pos`, valid at `timestamp`
    Play {
        timestamp: i64,
        media_id: String,
        start_pos: i64,
        #[serde(default = "default_speed")]
        speed: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artist: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumbnail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requester_name: Option<String>,
    },

    Pause {
        timestamp: i64,
        pos: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requester_name: Option<String>,
    },

    Seek {
        timestamp: i64,
        pos: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requester_name: Option<String>,
    },

    // === Session management ===
    /// Ask the host for a fresh snapshot
    RequestState {
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_avatar: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_uid: Option<String>,
    },

    /// Announce ourselves to the session
    Join {
        timestamp: i64,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<String>,
    },

    /// Full authoritative state (host only)
    StateSync { timestamp: i64, state: SessionState },

    // === Clock synchronization ===
    Ping {
        timestamp: i64,
        id: String,
        client_timestamp: i64,
    },

    /// Host reply carrying receipt and send times on the global clock
    Pong {
        timestamp: i64,
        id: String,
        client_timestamp: i64,
        server_timestamp: i64,
        server_reply_timestamp: i64,
    },
}

impl SyncEvent {
    /// Serialize to the wire payload
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a wire payload. Never panics on malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
        let kind = match &value {
            Value::Object(fields) => match fields.get("type") {
                Some(Value::String(kind)) => kind.clone(),
                _ => return Err(DecodeError::MissingType),
            },
            _ => return Err(DecodeError::NotAnObject),
        };

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(DecodeError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| DecodeError::InvalidEvent {
            kind,
            reason: e.to_string(),
        })
    }

    /// Wire tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Play { .. } => "play",
            SyncEvent::Pause { .. } => "pause",
            SyncEvent::Seek { .. } => "seek",
            SyncEvent::RequestState { .. } => "request_state",
            SyncEvent::Join { .. } => "join",
            SyncEvent::StateSync { .. } => "state_sync",
            SyncEvent::Ping { .. } => "ping",
            SyncEvent::Pong { .. } => "pong",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            SyncEvent::Play { timestamp, .. }
            | SyncEvent::Pause { timestamp, .. }
            | SyncEvent::Seek { timestamp, .. }
            | SyncEvent::RequestState { timestamp, .. }
            | SyncEvent::Join { timestamp, .. }
            | SyncEvent::StateSync { timestamp, .. }
            | SyncEvent::Ping { timestamp, .. }
            | SyncEvent::Pong { timestamp, .. } => *timestamp,
        }
    }

    /// Check if this event changes playback and is therefore subject to host authority
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            SyncEvent::Play { .. }
                | SyncEvent::Pause { .. }
                | SyncEvent::Seek { .. }
                | SyncEvent::StateSync { .. }
        )
    }

    /// Name of whoever asked for a playback change, if the event says
    pub fn requester_name(&self) -> Option<&str> {
        match self {
            SyncEvent::Play { requester_name, .. }
            | SyncEvent::Pause { requester_name, .. }
            | SyncEvent::Seek { requester_name, .. } => requester_name.as_deref(),
            _ => None,
        }
    }
}
