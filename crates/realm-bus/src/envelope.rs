//! # Envelopes
//!
//! The wire shape shared by every transport, and the predicates that decide
//! whether a raw message belongs to a given exchange.
//!
//! ## Wire Format
//!
//! ```text
//! { "topic": "> name", "payload": <any>, "id": 7 }                      request
//! { "topic": "< name", "payload": { "response": <any> }, "id": 7 }      reply
//! { "topic": "< name", "payload": { "error": { "message": .. } } }      failed reply
//! ```
//!
//! One physical channel carries many logical exchanges; the directional
//! marker keeps a request from being mistaken for its own reply.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SerializedError;
use crate::{REPLY_MARKER, REQUEST_MARKER, WILDCARD_TOPIC};

/// Correlation token echoed by a reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric id.
    Number(i64),
    /// String id.
    Text(String),
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A message as it crosses a transport boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Directional topic (`"> name"` or `"< name"`).
    pub topic: String,
    /// Caller payload, opaque to the bus.
    #[serde(default)]
    pub payload: Value,
    /// Correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
}

impl Envelope {
    /// Build a request envelope for `topic`.
    #[must_use]
    pub fn request(topic: &str, payload: Value, id: Option<MessageId>) -> Self {
        Self {
            topic: request_topic(topic),
            payload,
            id,
        }
    }

    /// Build the reply to `request` carrying `payload`.
    #[must_use]
    pub fn reply_to(request: &Envelope, payload: ReplyPayload) -> Self {
        Self {
            topic: reply_topic_for(&request.topic),
            payload: payload.into_value(),
            id: request.id.clone(),
        }
    }

    /// Whether the topic carries the request marker.
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.topic.starts_with(REQUEST_MARKER)
    }
}

/// Outcome carried by a reply envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPayload {
    /// The handler resolved.
    Response(Value),
    /// The handler failed.
    Error(SerializedError),
}

impl ReplyPayload {
    /// Encode as `{ "response": .. }` or `{ "error": .. }`.
    #[must_use]
    pub fn into_value(self) -> Value {
        let mut map = Map::new();
        match self {
            Self::Response(response) => {
                map.insert("response".to_owned(), response);
            }
            Self::Error(error) => {
                let error = serde_json::to_value(error).unwrap_or(Value::Null);
                map.insert("error".to_owned(), error);
            }
        }
        Value::Object(map)
    }

    /// Decode a reply payload. Returns `None` for a bare value, which is never
    /// a well-formed reply.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };
        match map.remove("error") {
            Some(Value::Null) | None => {}
            Some(Value::String(message)) => {
                return Some(Self::Error(SerializedError::new("Error", message)));
            }
            Some(error) => {
                let error = serde_json::from_value(error).unwrap_or_else(|e| {
                    SerializedError::new("Error", format!("malformed error payload: {e}"))
                });
                return Some(Self::Error(error));
            }
        }
        if !map.contains_key("response") {
            return None;
        }
        Some(Self::Response(map.remove("response").unwrap_or(Value::Null)))
    }
}

/// `"> topic"`.
#[must_use]
pub fn request_topic(topic: &str) -> String {
    format!("{REQUEST_MARKER} {topic}")
}

/// `"< topic"`.
#[must_use]
pub fn reply_topic(topic: &str) -> String {
    format!("{REPLY_MARKER} {topic}")
}

/// Swap the first request marker of a raw topic for the reply marker.
#[must_use]
pub fn reply_topic_for(raw_topic: &str) -> String {
    raw_topic.replacen(REQUEST_MARKER, &REPLY_MARKER.to_string(), 1)
}

/// Drop the directional marker (and the space after it) from a raw topic.
#[must_use]
pub fn strip_marker(raw_topic: &str) -> &str {
    raw_topic
        .strip_prefix(REQUEST_MARKER)
        .or_else(|| raw_topic.strip_prefix(REPLY_MARKER))
        .map_or(raw_topic, |rest| rest.strip_prefix(' ').unwrap_or(rest))
}

/// True iff `raw` is a request for `topic`, or any request when `topic` is the
/// wildcard.
#[must_use]
pub fn is_request_envelope(topic: &str, raw: &Envelope) -> bool {
    if topic == WILDCARD_TOPIC {
        return !raw.topic.starts_with(REPLY_MARKER);
    }
    raw.topic == request_topic(topic)
}

/// True iff `raw` is a reply for `topic` with a payload and, when `id` is
/// given, the same correlation id.
#[must_use]
pub fn is_reply_envelope(id: Option<&MessageId>, topic: &str, raw: &Envelope) -> bool {
    if raw.topic != reply_topic(topic) || raw.payload.is_null() {
        return false;
    }
    match id {
        Some(id) => raw.id.as_ref() == Some(id),
        None => true,
    }
}
