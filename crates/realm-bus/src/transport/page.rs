//! # Page Transport
//!
//! Request/reply between the content script and the script injected into the
//! page, over window messages of one document.
//!
//! Window posts echo back to the poster, so every request this side sends is
//! recorded while in flight and ignored by this side's own reply listeners.
//! Replies are only accepted when they were posted in this same document.
//! A wildcard handler leaves alone any request a named handler on the same
//! transport answers.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{await_reply, settle, spawn_answer, RawHandler, Transport, Unsubscribe};
use crate::envelope::{is_request_envelope, request_topic, strip_marker, Envelope, MessageId};
use crate::error::BusError;
use crate::host::{HostPorts, MessageListener, WindowPort};
use crate::WILDCARD_TOPIC;

type RequestKey = (String, Option<MessageId>);

#[derive(Default)]
struct Outstanding {
    requests: Mutex<HashMap<RequestKey, usize>>,
}

impl Outstanding {
    fn track(self: &Arc<Self>, key: RequestKey) -> OutstandingGuard {
        *self.requests.lock().entry(key.clone()).or_default() += 1;
        OutstandingGuard {
            outstanding: self.clone(),
            key,
        }
    }

    fn contains(&self, topic: &str, id: Option<&MessageId>) -> bool {
        self.requests
            .lock()
            .contains_key(&(topic.to_owned(), id.cloned()))
    }
}

struct OutstandingGuard {
    outstanding: Arc<Outstanding>,
    key: RequestKey,
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        let mut requests = self.outstanding.requests.lock();
        if let Some(count) = requests.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                requests.remove(&self.key);
            }
        }
    }
}

/// Live named reply handlers per topic.
#[derive(Default)]
struct NamedReplies {
    topics: Mutex<HashMap<String, usize>>,
}

impl NamedReplies {
    fn add(&self, topic: &str) {
        *self.topics.lock().entry(topic.to_owned()).or_default() += 1;
    }

    fn remove(&self, topic: &str) {
        let mut topics = self.topics.lock();
        if let Some(count) = topics.get_mut(topic) {
            *count -= 1;
            if *count == 0 {
                topics.remove(topic);
            }
        }
    }

    fn contains(&self, topic: &str) -> bool {
        self.topics.lock().contains_key(topic)
    }
}

/// Request/reply over same-document window messages.
pub struct PageTransport {
    window: Option<Arc<dyn WindowPort>>,
    outstanding: Arc<Outstanding>,
    named: Arc<NamedReplies>,
}

impl PageTransport {
    pub const NAME: &'static str = "page";

    #[must_use]
    pub fn new(ports: &HostPorts) -> Self {
        Self {
            window: ports.window.clone(),
            outstanding: Arc::new(Outstanding::default()),
            named: Arc::new(NamedReplies::default()),
        }
    }

    /// Whether a reply handler serves exactly `topic`. A wildcard handler
    /// does not count.
    #[must_use]
    pub fn has_reply(&self, topic: &str) -> bool {
        topic != WILDCARD_TOPIC && self.named.contains(topic)
    }

    fn port(&self) -> Result<&Arc<dyn WindowPort>, BusError> {
        self.window.as_ref().ok_or(BusError::Unavailable {
            transport: Self::NAME,
        })
    }
}

#[async_trait]
impl Transport for PageTransport {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn available(&self) -> bool {
        self.window.is_some()
    }

    async fn send(
        &self,
        topic: &str,
        payload: Value,
        id: Option<MessageId>,
    ) -> Result<Value, BusError> {
        let window = self.port()?;
        let document = window.document();
        let _guard = self
            .outstanding
            .track((request_topic(topic), id.clone()));
        let reply = await_reply(window, topic, id.clone(), move |sender| {
            sender.document == Some(document)
        });
        debug!(transport = Self::NAME, topic, id = ?id, "Sending request");
        window.post(Envelope::request(topic, payload, id));
        settle(topic, reply).await
    }

    fn reply(&self, topic: &str, handler: RawHandler) -> Result<Unsubscribe, BusError> {
        let window = self.port()?.clone();
        let document = window.document();
        let outstanding = self.outstanding.clone();
        let named = self.named.clone();
        let wildcard = topic == WILDCARD_TOPIC;
        let topic = topic.to_owned();
        let poster = window.clone();

        let listener: MessageListener = {
            let named = named.clone();
            let topic = topic.clone();
            Arc::new(move |envelope, sender| {
                if sender.document != Some(document) || !is_request_envelope(&topic, envelope) {
                    return;
                }
                // Echo of a request this side is waiting on.
                if outstanding.contains(&envelope.topic, envelope.id.as_ref()) {
                    return;
                }
                if wildcard && named.contains(strip_marker(&envelope.topic)) {
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
            })
        };

        if !wildcard {
            named.add(&topic);
        }
        let listener_id = window.add_listener(listener);
        Ok(Unsubscribe::new(move || {
            window.remove_listener(listener_id);
            if !wildcard {
                named.remove(&topic);
            }
        }))
    }
}
