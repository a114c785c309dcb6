//! # Transports
//!
//! Every way one realm can reach another implements [`Transport`]:
//!
//! | Transport            | Primitive                 | Connects                          |
//! |----------------------|---------------------------|-----------------------------------|
//! | [`RuntimeTransport`] | runtime broadcast         | background ↔ popup                |
//! | [`ScopedTransport`]  | tab-addressed runtime     | background/popup ↔ contentscript  |
//! | [`PageTransport`]    | window messages           | contentscript ↔ inpage            |
//! | [`BridgeTransport`]  | scoped or page, relayed   | background/popup ↔ inpage         |
//!
//! The helpers in this module hold the parts every transport shares: the
//! one-shot correlation listener behind `send`, and the spawned handler run
//! behind `reply` that always answers exactly once.

mod bridge;
mod page;
mod runtime;
mod scoped;

pub use bridge::{BridgeRelay, BridgeTransport};
pub use page::PageTransport;
pub use runtime::RuntimeTransport;
pub use scoped::{ActiveTabTracker, ScopedTransport};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;
use tracing::{error, warn};

use crate::envelope::{is_reply_envelope, Envelope, MessageId, ReplyPayload};
use crate::error::{BusError, SerializedError};
use crate::host::{MessageChannel, MessageListener, MessageSender};

/// What a reply handler learns about the request it serves.
#[derive(Debug, Clone)]
pub struct ReplyContext {
    /// Host description of the sender.
    pub sender: MessageSender,
    /// Raw request topic, marker included (`"> name"`).
    pub topic: String,
    /// Correlation id of the request.
    pub id: Option<MessageId>,
}

/// Future returned by a [`RawHandler`].
pub type HandlerFuture = BoxFuture<'static, Result<Value, SerializedError>>;

/// Untyped reply handler.
pub type RawHandler = Arc<dyn Fn(Value, ReplyContext) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`RawHandler`].
pub fn raw_handler<F, Fut>(f: F) -> RawHandler
where
    F: Fn(Value, ReplyContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, SerializedError>> + Send + 'static,
{
    Arc::new(move |payload, context| f(payload, context).boxed())
}

/// Removes one reply registration.
///
/// Dropping it leaves the registration in place; registrations normally live
/// as long as the realm.
pub struct Unsubscribe {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Unsubscribe {
    pub(crate) fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Combine several registrations into one handle.
    #[must_use]
    pub fn all(handles: Vec<Unsubscribe>) -> Self {
        Self::new(move || {
            for handle in handles {
                handle.unsubscribe();
            }
        })
    }

    /// Remove the registration.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("pending", &self.remove.is_some())
            .finish()
    }
}

/// A way of exchanging correlated request/reply messages with another realm.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether the underlying primitive exists in this realm. Fixed at
    /// construction.
    fn available(&self) -> bool;

    /// Send `payload` on `topic` and wait for the correlated reply.
    async fn send(
        &self,
        topic: &str,
        payload: Value,
        id: Option<MessageId>,
    ) -> Result<Value, BusError>;

    /// Serve requests on `topic` (or every request with `"*"`).
    fn reply(&self, topic: &str, handler: RawHandler) -> Result<Unsubscribe, BusError>;
}

/// Register a listener that fires once for the reply to `(topic, id)` and
/// removes itself.
///
/// Replies to abandoned calls still remove the listener; the payload is then
/// dropped with the receiver.
pub(crate) fn await_reply<C, F>(
    channel: &Arc<C>,
    topic: &str,
    id: Option<MessageId>,
    accept: F,
) -> oneshot::Receiver<Value>
where
    C: MessageChannel + ?Sized + 'static,
    F: Fn(&MessageSender) -> bool + Send + Sync + 'static,
{
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let registered: Arc<OnceLock<_>> = Arc::new(OnceLock::new());
    let settled = Arc::new(AtomicBool::new(false));
    let channel_ref = Arc::downgrade(channel);
    let topic = topic.to_owned();

    let listener: MessageListener = {
        let registered = registered.clone();
        let settled = settled.clone();
        Arc::new(move |envelope: &Envelope, sender: &MessageSender| {
            if !accept(sender) || !is_reply_envelope(id.as_ref(), &topic, envelope) {
                return;
            }
            let Some(tx) = tx.lock().take() else {
                return;
            };
            settled.store(true, Ordering::Release);
            if let (Some(channel), Some(listener_id)) = (channel_ref.upgrade(), registered.get()) {
                channel.remove_listener(*listener_id);
            }
            let _ = tx.send(envelope.payload.clone());
        })
    };

    let listener_id = channel.add_listener(listener);
    let _ = registered.set(listener_id);
    // Settled between add and set: the listener could not remove itself.
    if settled.load(Ordering::Acquire) {
        channel.remove_listener(listener_id);
    }
    rx
}

/// Turn a received reply payload into the caller's result.
pub(crate) async fn settle(
    topic: &str,
    reply: oneshot::Receiver<Value>,
) -> Result<Value, BusError> {
    let payload = reply.await.map_err(|_| BusError::Abandoned {
        topic: topic.to_owned(),
    })?;
    match ReplyPayload::from_value(payload) {
        Some(ReplyPayload::Response(response)) => Ok(response),
        Some(ReplyPayload::Error(error)) => Err(BusError::Remote(error.into_remote())),
        None => Err(BusError::MalformedReply {
            topic: topic.to_owned(),
        }),
    }
}

/// Run `handler` for `request` on a spawned task and hand exactly one reply
/// envelope to `deliver`, whether the handler resolves, fails or panics.
pub(crate) fn spawn_answer<D, Fut>(
    transport: &'static str,
    handler: RawHandler,
    request: Envelope,
    sender: MessageSender,
    deliver: D,
) where
    D: FnOnce(Envelope) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        error!(
            transport,
            topic = %request.topic,
            "No async runtime to run reply handler; request dropped"
        );
        return;
    };

    let context = ReplyContext {
        sender,
        topic: request.topic.clone(),
        id: request.id.clone(),
    };
    let payload = request.payload.clone();

    runtime.spawn(async move {
        let outcome = AssertUnwindSafe(async move { handler(payload, context).await })
            .catch_unwind()
            .await;
        let reply = match outcome {
            Ok(Ok(response)) => ReplyPayload::Response(response),
            Ok(Err(error)) => ReplyPayload::Error(error),
            Err(_) => {
                warn!(transport, topic = %request.topic, "Reply handler panicked");
                ReplyPayload::Error(SerializedError::new("Error", "reply handler panicked"))
            }
        };
        deliver(Envelope::reply_to(&request, reply)).await;
    });
}
