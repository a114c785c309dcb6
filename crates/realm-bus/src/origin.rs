//! # Origin Validation
//!
//! Wraps a transport so its reply handlers only run for senders inside the
//! extension's own namespace. Other requests are answered with an `error`
//! response without reaching the handler. Sending is not affected.
//!
//! The guard sees only what the inner transport delivers. Over the runtime
//! transport page realms are already filtered out by tab, so the rejection
//! there is for frames outside the extension that reach its runtime.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::envelope::MessageId;
use crate::error::BusError;
use crate::host::{MessageSender, RuntimePort};
use crate::transport::{raw_handler, RawHandler, Transport, Unsubscribe};

/// Transport decorator checking the sender URL of every request.
pub struct OriginGuard {
    inner: Arc<dyn Transport>,
    runtime: Option<Arc<dyn RuntimePort>>,
    rejection: String,
}

impl OriginGuard {
    /// Guard `inner`, deriving the extension namespace from `runtime`.
    /// `rejection` is the error text returned to rejected senders.
    #[must_use]
    pub fn new(
        inner: Arc<dyn Transport>,
        runtime: Option<Arc<dyn RuntimePort>>,
        rejection: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            runtime,
            rejection: rejection.into(),
        }
    }
}

/// Whether `sender` posted from a URL under the extension's base address.
fn is_trusted(runtime: Option<&Arc<dyn RuntimePort>>, sender: &MessageSender) -> bool {
    let (Some(runtime), Some(url)) = (runtime, sender.url.as_deref()) else {
        return false;
    };
    url.starts_with(&runtime.get_url(""))
}

#[async_trait]
impl Transport for OriginGuard {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn available(&self) -> bool {
        self.inner.available()
    }

    async fn send(
        &self,
        topic: &str,
        payload: Value,
        id: Option<MessageId>,
    ) -> Result<Value, BusError> {
        self.inner.send(topic, payload, id).await
    }

    fn reply(&self, topic: &str, handler: RawHandler) -> Result<Unsubscribe, BusError> {
        let runtime = self.runtime.clone();
        let rejection = self.rejection.clone();
        let guarded = raw_handler(move |payload, context| {
            let handler = handler.clone();
            let trusted = is_trusted(runtime.as_ref(), &context.sender);
            let rejection = rejection.clone();
            async move {
                if !trusted {
                    warn!(
                        topic = %context.topic,
                        sender = ?context.sender.url,
                        "Rejected request from outside the extension"
                    );
                    return Ok(json!({ "error": rejection }));
                }
                handler(payload, context).await
            }
        });
        self.inner.reply(topic, guarded)
    }
}
