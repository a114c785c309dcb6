//! # Bus Errors
//!
//! Failure taxonomy of the bus and the explicit conversion pair used to carry
//! handler errors across a realm boundary.
//!
//! ## SerializedError Field Set (version 1)
//!
//! | Field     | Type            | Notes                                  |
//! |-----------|-----------------|----------------------------------------|
//! | `name`    | string          | error class, `"Error"` when unknown    |
//! | `message` | string          | human readable message                 |
//! | `stack`   | string?         | cause chain or stack, when available   |
//! | `code`    | integer?        | provider / JSON-RPC error code         |
//! | `data`    | any?            | structured detail                      |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::realm::Realm;

/// Version of the [`SerializedError`] field set.
pub const SERIALIZED_ERROR_VERSION: u16 = 1;

/// Errors surfaced by transports, the resolver and the messenger.
#[derive(Debug, Error)]
pub enum BusError {
    /// No transport connects the two realms.
    #[error("no connection configured between {from} and {to}")]
    NoConnection { from: Realm, to: Realm },

    /// The transport's host primitive does not exist in this realm.
    #[error("{transport} is not available in this realm")]
    Unavailable { transport: &'static str },

    /// The remote handler failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The outgoing payload could not be encoded.
    #[error("failed to encode payload for topic '{topic}': {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// The reply could not be decoded into the expected type.
    #[error("failed to decode reply for topic '{topic}': {source}")]
    Decode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// The other realm refused the request with an `{"error": <text>}`
    /// response, the way an origin guard answers untrusted senders.
    #[error("request for topic '{topic}' was rejected: {message}")]
    Rejected { topic: String, message: String },

    /// The reply carried neither `response` nor `error`.
    #[error("malformed reply for topic '{topic}'")]
    MalformedReply { topic: String },

    /// The host dropped the correlation listener before a reply arrived.
    #[error("reply listener for topic '{topic}' was dropped before a reply arrived")]
    Abandoned { topic: String },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BusError {
    /// The remote error, if the handler on the other side failed.
    #[must_use]
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(remote) => Some(remote),
            _ => None,
        }
    }
}

/// Plain property bag standing in for an error on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SerializedError {
    /// Error with only a name and a message.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Rebuild the error on the receiving side.
    #[must_use]
    pub fn into_remote(self) -> RemoteError {
        RemoteError::from(self)
    }
}

/// An error raised by a handler in another realm.
///
/// Handlers may also return it directly to control every serialized field.
#[derive(Debug, Clone, Default, PartialEq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub code: Option<i64>,
    pub data: Option<Value>,
}

impl RemoteError {
    /// Error with the generic `"Error"` name.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_owned(),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Set the error code.
    #[must_use]
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// Set the error name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl From<SerializedError> for RemoteError {
    fn from(e: SerializedError) -> Self {
        Self {
            name: if e.name.is_empty() {
                "Error".to_owned()
            } else {
                e.name
            },
            message: e.message,
            stack: e.stack,
            code: e.code,
            data: e.data,
        }
    }
}

impl From<&RemoteError> for SerializedError {
    fn from(e: &RemoteError) -> Self {
        Self {
            name: e.name.clone(),
            message: e.message.clone(),
            stack: e.stack.clone(),
            code: e.code,
            data: e.data.clone(),
        }
    }
}

/// Flatten a handler error into the wire field set.
///
/// A [`RemoteError`] anywhere in the chain keeps all of its fields, so errors
/// relayed through an intermediate realm arrive unchanged. Other errors keep
/// their display message; their causes become the `stack`.
#[must_use]
pub fn to_serializable(error: &anyhow::Error) -> SerializedError {
    let remote = error.chain().find_map(|e| {
        e.downcast_ref::<RemoteError>()
            .or_else(|| e.downcast_ref::<BusError>().and_then(BusError::as_remote))
    });
    if let Some(remote) = remote {
        return SerializedError::from(remote);
    }

    let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
    SerializedError {
        name: "Error".to_owned(),
        message: error.to_string(),
        stack: (!causes.is_empty()).then(|| causes.join("\n")),
        code: None,
        data: None,
    }
}
