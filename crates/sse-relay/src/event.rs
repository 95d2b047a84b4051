//! Event and message types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Event type used when the publisher does not name one
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Channel names reserved as resume/redirect control parameters
pub const RESERVED_CHANNEL_NAMES: [&str; 2] = ["polling", "lastEventId"];

/// A published event, addressable by `(channel, id)`
///
/// `id` is the channel-scoped sequence id: assigned exactly once at publish
/// time, starting at 1, monotonically increasing and gap-free per channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Channel the event was published on
    pub channel: String,

    /// Channel-scoped sequence id
    pub id: u64,

    /// Event type (e.g., "message", "notice", "update")
    #[serde(rename = "event")]
    pub event_type: String,

    /// Opaque payload
    pub data: String,
}

impl Event {
    /// Create a new event
    pub fn new(
        channel: impl Into<String>,
        id: u64,
        event_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            id,
            event_type: event_type.into(),
            data: data.into(),
        }
    }

    /// The `channel:id` form carried as the SSE `id` field, so a
    /// single-channel client's `Last-Event-ID` header round-trips
    pub fn wire_id(&self) -> String {
        format!("{}:{}", self.channel, self.id)
    }
}

/// A message handed to the publish path, before a sequence id is assigned
///
/// Ambiguity is resolved here at the API edge: either a plain payload with
/// the implicit default type, or an explicit (type, payload) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Plain payload, delivered with [`DEFAULT_EVENT_TYPE`]
    Text(String),
    /// Explicit event type and payload
    Typed { event_type: String, data: String },
}

impl Message {
    /// Create a typed message
    pub fn typed(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Typed {
            event_type: event_type.into(),
            data: data.into(),
        }
    }

    /// Normalize a JSON value into a message
    ///
    /// An object with exactly one entry becomes a typed message: the key is
    /// the event type and the value the payload. Anything else becomes a
    /// plain message (strings unquoted, other values as compact JSON).
    pub fn from_json(value: &serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = value {
            if map.len() == 1 {
                if let Some((event_type, data)) = map.iter().next() {
                    return Self::Typed {
                        event_type: event_type.clone(),
                        data: json_payload(data),
                    };
                }
            }
        }
        Self::Text(json_payload(value))
    }

    /// Split into `(event_type, data)`
    pub fn into_parts(self) -> (String, String) {
        match self {
            Self::Text(data) => (DEFAULT_EVENT_TYPE.to_string(), data),
            Self::Typed { event_type, data } => (event_type, data),
        }
    }
}

fn json_payload(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<String> for Message {
    fn from(data: String) -> Self {
        Self::Text(data)
    }
}

impl From<&str> for Message {
    fn from(data: &str) -> Self {
        Self::Text(data.to_string())
    }
}

/// Last-seen sequence id per channel, supplied by a reconnecting client
///
/// Absence of the whole map means live-only: no replay.
pub type ResumePoint = HashMap<String, u64>;

/// Reject channel names that collide with reserved control parameters
pub fn validate_channel(name: &str) -> Result<()> {
    if RESERVED_CHANNEL_NAMES.contains(&name) {
        return Err(Error::ReservedChannelName(name.to_string()));
    }
    Ok(())
}

/// Validate and deduplicate a channel set, preserving request order
pub(crate) fn normalize_channels(channels: &[String]) -> Result<Vec<String>> {
    if channels.is_empty() {
        return Err(Error::EmptyChannelSet);
    }
    let mut normalized: Vec<String> = Vec::with_capacity(channels.len());
    for channel in channels {
        validate_channel(channel)?;
        if !normalized.iter().any(|c| c == channel) {
            normalized.push(channel.clone());
        }
    }
    Ok(normalized)
}

/// Encode a resume point as one `lastEventId` value: ids joined with `,`,
/// aligned with `channels` order. Channels absent from the map encode as 0.
pub fn encode_resume(channels: &[String], resume: &ResumePoint) -> String {
    channels
        .iter()
        .map(|c| resume.get(c).copied().unwrap_or(0).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode a `lastEventId` value against the request's channel order
///
/// Accepts the comma-joined form produced by [`encode_resume`] and the
/// single `channel:id` form a live SSE frame carries in its `id` field.
/// Unparseable parts and zero ids are skipped.
pub fn decode_resume(channels: &[String], raw: &str) -> ResumePoint {
    let raw = raw.trim();
    let mut resume = ResumePoint::new();

    if let Some((channel, id)) = raw.rsplit_once(':') {
        if let Ok(id) = id.parse::<u64>() {
            if channels.iter().any(|c| c == channel) {
                if id > 0 {
                    resume.insert(channel.to_string(), id);
                }
                return resume;
            }
        }
    }

    for (channel, part) in channels.iter().zip(raw.split(',')) {
        if let Ok(id) = part.trim().parse::<u64>() {
            if id > 0 {
                resume.insert(channel.clone(), id);
            }
        }
    }
    resume
}
