//! # Realm-Wide Transport
//!
//! Broadcasts over the extension's runtime primitive. Reaches every other
//! extension page, so it connects the background worker and the popup.
//! Messages that carry a tab come from page realms and are ignored here.
//! That filter runs before any handler, so a guard wrapped around this
//! transport only ever judges senders without a tab: extension pages and
//! foreign frames.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{await_reply, settle, spawn_answer, RawHandler, Transport, Unsubscribe};
use crate::envelope::{is_request_envelope, Envelope, MessageId};
use crate::error::BusError;
use crate::host::{HostPorts, MessageListener, RuntimePort};

/// Request/reply over runtime broadcast.
pub struct RuntimeTransport {
    runtime: Option<Arc<dyn RuntimePort>>,
}

impl RuntimeTransport {
    pub const NAME: &'static str = "runtime";

    /// Bind to the runtime primitive of `ports`, if any.
    #[must_use]
    pub fn new(ports: &HostPorts) -> Self {
        Self {
            runtime: ports.runtime.clone(),
        }
    }

    fn port(&self) -> Result<&Arc<dyn RuntimePort>, BusError> {
        self.runtime.as_ref().ok_or(BusError::Unavailable {
            transport: Self::NAME,
        })
    }
}

#[async_trait]
impl Transport for RuntimeTransport {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn available(&self) -> bool {
        self.runtime.is_some()
    }

    async fn send(
        &self,
        topic: &str,
        payload: Value,
        id: Option<MessageId>,
    ) -> Result<Value, BusError> {
        let runtime = self.port()?;
        let reply = await_reply(runtime, topic, id.clone(), |sender| sender.tab.is_none());
        debug!(transport = Self::NAME, topic, id = ?id, "Sending request");
        runtime.post(Envelope::request(topic, payload, id));
        settle(topic, reply).await
    }

    fn reply(&self, topic: &str, handler: RawHandler) -> Result<Unsubscribe, BusError> {
        let runtime = self.port()?.clone();
        let topic = topic.to_owned();
        let poster = runtime.clone();

        let listener: MessageListener = Arc::new(move |envelope, sender| {
            // Posts from page realms belong to the scoped transport.
            if sender.tab.is_some() || !is_request_envelope(&topic, envelope) {
                return;
            }
            let poster = poster.clone();
            spawn_answer(
                Self::NAME,
                handler.clone(),
                envelope.clone(),
                sender.clone(),
                move |reply| async move { poster.post(reply) },
            );
        });

        let listener_id = runtime.add_listener(listener);
        Ok(Unsubscribe::new(move || {
            runtime.remove_listener(listener_id);
        }))
    }
}
