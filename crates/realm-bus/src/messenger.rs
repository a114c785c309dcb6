//! # Messenger
//!
//! Typed face of a transport. Payloads and results are encoded with
//! `serde_json`; handler errors are flattened with
//! [`to_serializable`](crate::to_serializable).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::envelope::{strip_marker, MessageId};
use crate::error::{to_serializable, BusError, SerializedError};
use crate::realm::Realm;
use crate::transport::{raw_handler, ReplyContext, Transport, Unsubscribe};

/// Per-call options of [`Messenger::send`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Correlation id. Without one, only a single call per topic may be in
    /// flight on a transport.
    pub id: Option<MessageId>,
}

impl SendOptions {
    #[must_use]
    pub fn with_id(id: impl Into<MessageId>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }

    /// Options with a fresh random id.
    #[must_use]
    pub fn correlated() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }
}

/// Sends to and serves one other realm.
#[derive(Clone)]
pub struct Messenger {
    transport: Arc<dyn Transport>,
    from: Realm,
    to: Realm,
}

impl Messenger {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, from: Realm, to: Realm) -> Self {
        Self {
            transport,
            from,
            to,
        }
    }

    /// The realm this messenger runs in.
    #[must_use]
    pub fn realm(&self) -> Realm {
        self.from
    }

    /// The realm it talks to.
    #[must_use]
    pub fn target(&self) -> Realm {
        self.to
    }

    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    #[must_use]
    pub fn available(&self) -> bool {
        self.transport.available()
    }

    /// Send `payload` on `topic` and decode the reply as `R`.
    ///
    /// There is no timeout; wrap the call in `tokio::time::timeout` if the
    /// other realm may never answer.
    ///
    /// A response of exactly `{"error": <text>}` that does not decode as `R`
    /// fails with [`BusError::Rejected`] instead of [`BusError::Decode`].
    pub async fn send<P, R>(
        &self,
        topic: &str,
        payload: &P,
        options: SendOptions,
    ) -> Result<R, BusError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload).map_err(|source| BusError::Encode {
            topic: topic.to_owned(),
            source,
        })?;
        let response = self.transport.send(topic, payload, options.id).await?;
        let rejection = rejection_text(&response);
        serde_json::from_value(response).map_err(|source| match rejection {
            Some(message) => BusError::Rejected {
                topic: topic.to_owned(),
                message,
            },
            None => BusError::Decode {
                topic: topic.to_owned(),
                source,
            },
        })
    }

    /// Serve `topic` with `handler`. A payload that does not decode as `P`
    /// is answered with a `TypeError` without calling the handler.
    pub fn reply<P, R, F, Fut>(&self, topic: &str, handler: F) -> Result<Unsubscribe, BusError>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, ReplyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.transport.reply(
            topic,
            raw_handler(move |payload, context| {
                let handler = handler.clone();
                async move {
                    let payload: P = serde_json::from_value(payload).map_err(|e| {
                        SerializedError::new(
                            "TypeError",
                            format!("invalid payload for '{}': {e}", strip_marker(&context.topic)),
                        )
                    })?;
                    let result = handler(payload, context)
                        .await
                        .map_err(|e| to_serializable(&e))?;
                    serde_json::to_value(result)
                        .map_err(|e| SerializedError::new("TypeError", e.to_string()))
                }
            }),
        )
    }
}

/// The text of an `{"error": <text>}` response.
fn rejection_text(response: &Value) -> Option<String> {
    let object = response.as_object().filter(|object| object.len() == 1)?;
    object.get("error")?.as_str().map(str::to_owned)
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("transport", &self.transport.name())
            .finish()
    }
}
