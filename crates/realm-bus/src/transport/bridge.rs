//! # Bridge Transport and Relay
//!
//! Realms without a direct line reach each other through the content script:
//!
//! ```text
//!  popup/background ──scoped──► contentscript ──page──► inpage
//!                               [BridgeRelay]
//!  popup/background ◄──scoped── contentscript ◄──page── inpage
//! ```
//!
//! [`BridgeTransport`] is what the outer realms hold: it is the scoped
//! transport where the runtime exists and the page transport where only window
//! messages exist. [`BridgeRelay`] runs in the content script and forwards
//! every request arriving on one side through the other, answering with the
//! reply it gets back. Requests the content script answers itself, through a
//! named handler on the receiving transport, are not forwarded.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::{raw_handler, RawHandler, Transport, Unsubscribe};
use crate::envelope::{strip_marker, MessageId};
use crate::error::{BusError, SerializedError};
use crate::WILDCARD_TOPIC;

/// Reaches a realm through the content script relay.
pub struct BridgeTransport {
    inner: Option<Arc<dyn Transport>>,
}

impl BridgeTransport {
    pub const NAME: &'static str = "bridge";

    /// Choose the first available of `scoped` and `page`. The choice is fixed
    /// for the life of the bridge.
    #[must_use]
    pub fn new(scoped: Arc<dyn Transport>, page: Arc<dyn Transport>) -> Self {
        let inner = if scoped.available() {
            Some(scoped)
        } else if page.available() {
            Some(page)
        } else {
            None
        };
        if let Some(inner) = &inner {
            debug!(via = inner.name(), "Bridge transport selected");
        }
        Self { inner }
    }

    /// Name of the transport the bridge rides on.
    #[must_use]
    pub fn via(&self) -> Option<&'static str> {
        self.inner.as_ref().map(|inner| inner.name())
    }

    fn inner(&self) -> Result<&Arc<dyn Transport>, BusError> {
        self.inner.as_ref().ok_or(BusError::Unavailable {
            transport: Self::NAME,
        })
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn available(&self) -> bool {
        self.inner.is_some()
    }

    async fn send(
        &self,
        topic: &str,
        payload: Value,
        id: Option<MessageId>,
    ) -> Result<Value, BusError> {
        self.inner()?.send(topic, payload, id).await
    }

    fn reply(&self, topic: &str, handler: RawHandler) -> Result<Unsubscribe, BusError> {
        self.inner()?.reply(topic, handler)
    }
}

/// The content script's two-way forwarder between the page and scoped
/// transports.
#[derive(Debug)]
pub struct BridgeRelay {
    handles: Unsubscribe,
}

impl BridgeRelay {
    /// Serve every request on both transports by forwarding it to the other.
    pub fn install(page: Arc<dyn Transport>, scoped: Arc<dyn Transport>) -> Result<Self, BusError> {
        for transport in [&page, &scoped] {
            if !transport.available() {
                return Err(BusError::Unavailable {
                    transport: transport.name(),
                });
            }
        }

        let inbound = page.reply(WILDCARD_TOPIC, forward_to(scoped.clone()))?;
        let outbound = match scoped.reply(WILDCARD_TOPIC, forward_to(page)) {
            Ok(handle) => handle,
            Err(e) => {
                inbound.unsubscribe();
                return Err(e);
            }
        };

        info!("Bridge relay installed");
        Ok(Self {
            handles: Unsubscribe::all(vec![inbound, outbound]),
        })
    }

    /// Stop relaying.
    pub fn uninstall(self) {
        self.handles.unsubscribe();
        info!("Bridge relay removed");
    }
}

/// Handler that re-sends a request through `target` under the same topic and
/// id and answers with whatever comes back.
fn forward_to(target: Arc<dyn Transport>) -> RawHandler {
    raw_handler(move |payload, context| {
        let target = target.clone();
        async move {
            let topic = strip_marker(&context.topic).to_owned();
            debug!(to = target.name(), topic = %topic, id = ?context.id, "Relaying request");
            target
                .send(&topic, payload, context.id)
                .await
                .map_err(|e| match e {
                    BusError::Remote(remote) => SerializedError::from(&remote),
                    other => SerializedError::new("Error", other.to_string()),
                })
        }
    })
}
