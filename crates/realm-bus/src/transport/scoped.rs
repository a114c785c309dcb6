//! # Scoped Transport
//!
//! Request/reply between the extension pages and the content script of one
//! tab. Extension pages address requests to a tab; the content script answers
//! over its runtime primitive.
//!
//! ## Listener Table
//!
//! Every registration, reply handlers and pending `send` correlations alike,
//! lives in a per-topic table:
//!
//! ```text
//! topic ─► [Entry { key, kind, binding, listener, attached }]
//!                          │
//!                          └─► Binding { owner: Weak<instance>, released }
//! ```
//!
//! The table exists so a content script restored from the back/forward cache
//! can move every registration onto a fresh instance
//! ([`ScopedTransport::migrate_listeners`]) after detaching them from the
//! evicted one ([`ScopedTransport::stop_listeners`]). Listeners find their
//! instance through the binding at delivery time, so a migrated listener
//! answers through the new primitive.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::{settle, spawn_answer, RawHandler, Transport, Unsubscribe};
use crate::envelope::{is_reply_envelope, is_request_envelope, strip_marker, Envelope, MessageId};
use crate::error::BusError;
use crate::host::{
    HostPorts, ListenerId, MessageListener, MessageSender, RuntimePort, TabId, TabInfo, TabsPort,
};
use crate::WILDCARD_TOPIC;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Remembers which page the extension pages should talk to.
///
/// The focused tab wins when its URL starts with one of the eligible
/// prefixes. Otherwise (a settings page, a blank tab) the last eligible tab
/// seen stays the target.
#[derive(Debug)]
pub struct ActiveTabTracker {
    eligible_prefixes: Vec<String>,
    last_known: Mutex<Option<TabInfo>>,
}

impl ActiveTabTracker {
    #[must_use]
    pub fn new(eligible_prefixes: Vec<String>) -> Self {
        Self {
            eligible_prefixes,
            last_known: Mutex::new(None),
        }
    }

    /// Whether `tab` shows a page content scripts run in.
    #[must_use]
    pub fn is_eligible(&self, tab: &TabInfo) -> bool {
        tab.url.as_deref().is_some_and(|url| {
            self.eligible_prefixes
                .iter()
                .any(|prefix| url.starts_with(prefix.as_str()))
        })
    }

    /// The last eligible tab observed.
    #[must_use]
    pub fn last_known(&self) -> Option<TabInfo> {
        self.last_known.lock().clone()
    }

    /// Pick the tab to address: the focused one if eligible, else the last
    /// eligible one, else whatever is focused.
    pub async fn resolve(&self, tabs: &dyn TabsPort) -> Option<TabInfo> {
        match tabs.query_active().await {
            Some(tab) if self.is_eligible(&tab) => {
                *self.last_known.lock() = Some(tab.clone());
                Some(tab)
            }
            focused => self.last_known().or(focused),
        }
    }

    fn adopt(&self, previous: &Self) {
        let mut last_known = self.last_known.lock();
        if last_known.is_none() {
            *last_known = previous.last_known();
        }
    }
}

impl Default for ActiveTabTracker {
    fn default() -> Self {
        Self::new(vec!["http".to_owned()])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Reply,
    Pending,
}

/// Ties one registration to the instance currently hosting it.
struct Binding {
    owner: Mutex<Weak<ScopedShared>>,
    released: AtomicBool,
    topic: String,
    key: u64,
}

impl Binding {
    fn new(owner: &Arc<ScopedShared>, topic: &str) -> Arc<Self> {
        Arc::new(Self {
            owner: Mutex::new(Arc::downgrade(owner)),
            released: AtomicBool::new(false),
            topic: topic.to_owned(),
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn owner(&self) -> Option<Arc<ScopedShared>> {
        self.owner.lock().upgrade()
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Remove the registration from whichever instance hosts it. Idempotent.
    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(owner) = self.owner() {
            owner.remove_entry(&self.topic, self.key);
        }
    }
}

struct Entry {
    kind: EntryKind,
    binding: Arc<Binding>,
    listener: MessageListener,
    attached: Option<ListenerId>,
}

#[derive(Default)]
struct ListenerTable {
    topics: HashMap<String, Vec<Entry>>,
    stopped: bool,
}

struct ScopedShared {
    runtime: Option<Arc<dyn RuntimePort>>,
    tabs: Option<Arc<dyn TabsPort>>,
    active_tab: ActiveTabTracker,
    table: Mutex<ListenerTable>,
}

impl ScopedShared {
    /// Extension pages only listen to page realms; the content script hears
    /// nothing but extension pages anyway.
    fn accepts(&self, sender: &MessageSender) -> bool {
        self.tabs.is_none() || sender.tab.is_some()
    }

    /// Whether a live reply handler is registered for exactly `topic`.
    fn has_reply(&self, topic: &str) -> bool {
        self.table.lock().topics.get(topic).is_some_and(|entries| {
            entries
                .iter()
                .any(|e| e.kind == EntryKind::Reply && !e.binding.is_released())
        })
    }

    fn attach(&self, listener: &MessageListener) -> Option<ListenerId> {
        self.runtime
            .as_ref()
            .map(|runtime| runtime.add_listener(listener.clone()))
    }

    fn detach(&self, attached: Option<ListenerId>) {
        if let (Some(runtime), Some(id)) = (&self.runtime, attached) {
            runtime.remove_listener(id);
        }
    }

    fn insert(&self, topic: &str, kind: EntryKind, binding: Arc<Binding>, listener: MessageListener) {
        let mut table = self.table.lock();
        let attached = if table.stopped {
            None
        } else {
            self.attach(&listener)
        };
        table.topics.entry(topic.to_owned()).or_default().push(Entry {
            kind,
            binding,
            listener,
            attached,
        });
    }

    fn remove_entry(&self, topic: &str, key: u64) {
        let attached = {
            let mut table = self.table.lock();
            let Some(entries) = table.topics.get_mut(topic) else {
                return;
            };
            let Some(index) = entries.iter().position(|e| e.binding.key == key) else {
                return;
            };
            let entry = entries.remove(index);
            if entries.is_empty() {
                table.topics.remove(topic);
            }
            entry.attached
        };
        self.detach(attached);
    }

    /// Post `envelope` towards the other side: a tab for extension pages, the
    /// extension for the content script.
    async fn post_addressed(&self, envelope: Envelope, requester: Option<TabId>) {
        let Some(tabs) = &self.tabs else {
            if let Some(runtime) = &self.runtime {
                runtime.post(envelope);
            }
            return;
        };

        let target = match requester {
            Some(tab) => Some(tab),
            None => self.active_tab.resolve(tabs.as_ref()).await.map(|tab| tab.id),
        };
        match target {
            Some(tab) => tabs.send_message(tab, envelope),
            None => {
                debug!(topic = %envelope.topic, "No tab to address; broadcasting");
                if let Some(runtime) = &self.runtime {
                    runtime.post(envelope);
                }
            }
        }
    }
}

/// Tab-addressed request/reply with a migratable listener table.
pub struct ScopedTransport {
    shared: Arc<ScopedShared>,
}

impl ScopedTransport {
    pub const NAME: &'static str = "scoped";

    /// Bind to the runtime (and, on extension pages, tabs) primitives of
    /// `ports`.
    #[must_use]
    pub fn new(ports: &HostPorts, active_tab: ActiveTabTracker) -> Self {
        Self {
            shared: Arc::new(ScopedShared {
                runtime: ports.runtime.clone(),
                tabs: ports.tabs.clone(),
                active_tab,
                table: Mutex::new(ListenerTable::default()),
            }),
        }
    }

    fn ensure_available(&self) -> Result<(), BusError> {
        if self.available() {
            Ok(())
        } else {
            Err(BusError::Unavailable {
                transport: Self::NAME,
            })
        }
    }

    /// Tab tracking state of this instance.
    #[must_use]
    pub fn active_tab(&self) -> &ActiveTabTracker {
        &self.shared.active_tab
    }

    /// Detach every listener from the host primitive. Registrations stay in
    /// the table for [`migrate_listeners`](Self::migrate_listeners); later
    /// registrations are recorded but not attached.
    pub fn stop_listeners(&self) {
        let (runtime, attached) = {
            let mut table = self.shared.table.lock();
            table.stopped = true;
            let attached: Vec<ListenerId> = table
                .topics
                .values_mut()
                .flat_map(|entries| entries.iter_mut())
                .filter_map(|entry| entry.attached.take())
                .collect();
            (self.shared.runtime.clone(), attached)
        };
        if let Some(runtime) = runtime {
            for id in &attached {
                runtime.remove_listener(*id);
            }
        }
        info!(detached = attached.len(), "Scoped listeners stopped");
    }

    /// Move every registration into `next` and attach it to `next`'s
    /// primitive. Reply handlers already registered on `next` keep their
    /// topic. Returns the number of registrations moved.
    pub fn migrate_listeners(&self, next: &ScopedTransport) -> usize {
        if Arc::ptr_eq(&self.shared, &next.shared) {
            return 0;
        }

        let drained: Vec<(String, Entry)> = {
            let mut table = self.shared.table.lock();
            table.stopped = true;
            let topics = std::mem::take(&mut table.topics);
            let mut drained = Vec::new();
            for (topic, entries) in topics {
                for mut entry in entries {
                    self.shared.detach(entry.attached.take());
                    *entry.binding.owner.lock() = Arc::downgrade(&next.shared);
                    drained.push((topic.clone(), entry));
                }
            }
            drained
        };

        let mut moved = 0;
        {
            let mut table = next.shared.table.lock();
            for (topic, mut entry) in drained {
                if entry.binding.is_released() {
                    continue;
                }
                let stopped = table.stopped;
                let slot = table.topics.entry(topic).or_default();
                if entry.kind == EntryKind::Reply
                    && slot.iter().any(|e| e.kind == EntryKind::Reply)
                {
                    entry.binding.released.store(true, Ordering::Release);
                    continue;
                }
                if !stopped {
                    entry.attached = next.shared.attach(&entry.listener);
                }
                slot.push(entry);
                moved += 1;
            }
        }

        next.shared.active_tab.adopt(&self.shared.active_tab);
        info!(moved, "Scoped listeners migrated");
        moved
    }

    /// Registrations on `topic`, pending sends included.
    #[must_use]
    pub fn listener_count(&self, topic: &str) -> usize {
        self.shared
            .table
            .lock()
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Whether a reply handler serves exactly `topic`. A wildcard handler
    /// does not count.
    #[must_use]
    pub fn has_reply(&self, topic: &str) -> bool {
        topic != WILDCARD_TOPIC && self.shared.has_reply(topic)
    }

    /// Registrations currently attached to the host primitive.
    #[must_use]
    pub fn attached_count(&self) -> usize {
        self.shared
            .table
            .lock()
            .topics
            .values()
            .flatten()
            .filter(|entry| entry.attached.is_some())
            .count()
    }

    /// Whether [`stop_listeners`](Self::stop_listeners) or a migration
    /// retired this instance.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.table.lock().stopped
    }
}

impl std::fmt::Debug for ScopedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.shared.table.lock();
        f.debug_struct("ScopedTransport")
            .field("topics", &table.topics.len())
            .field("stopped", &table.stopped)
            .finish()
    }
}

#[async_trait]
impl Transport for ScopedTransport {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn available(&self) -> bool {
        self.shared.runtime.is_some()
    }

    async fn send(
        &self,
        topic: &str,
        payload: Value,
        id: Option<MessageId>,
    ) -> Result<Value, BusError> {
        self.ensure_available()?;

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let binding = Binding::new(&self.shared, topic);
        let listener: MessageListener = {
            let binding = binding.clone();
            let id = id.clone();
            let topic = topic.to_owned();
            Arc::new(move |envelope: &Envelope, sender: &MessageSender| {
                if binding.is_released() || !is_reply_envelope(id.as_ref(), &topic, envelope) {
                    return;
                }
                if binding.owner().is_some_and(|owner| !owner.accepts(sender)) {
                    return;
                }
                let Some(tx) = tx.lock().take() else {
                    return;
                };
                binding.release();
                let _ = tx.send(envelope.payload.clone());
            })
        };
        self.shared
            .insert(topic, EntryKind::Pending, binding, listener);

        debug!(transport = Self::NAME, topic, id = ?id, "Sending request");
        self.shared
            .post_addressed(Envelope::request(topic, payload, id), None)
            .await;
        settle(topic, rx).await
    }

    fn reply(&self, topic: &str, handler: RawHandler) -> Result<Unsubscribe, BusError> {
        self.ensure_available()?;

        let binding = Binding::new(&self.shared, topic);
        let wildcard = topic == WILDCARD_TOPIC;
        let listener: MessageListener = {
            let binding = binding.clone();
            let topic = topic.to_owned();
            Arc::new(move |envelope: &Envelope, sender: &MessageSender| {
                if binding.is_released() || !is_request_envelope(&topic, envelope) {
                    return;
                }
                let Some(owner) = binding.owner() else {
                    return;
                };
                if !owner.accepts(sender) {
                    return;
                }
                // A wildcard only serves topics nobody here answers by name.
                if wildcard && owner.has_reply(strip_marker(&envelope.topic)) {
                    return;
                }
                let requester = sender.tab.as_ref().map(|tab| tab.id);
                let binding = binding.clone();
                spawn_answer(
                    Self::NAME,
                    handler.clone(),
                    envelope.clone(),
                    sender.clone(),
                    move |reply| async move {
                        // Resolve again: the instance may have migrated meanwhile.
                        if let Some(owner) = binding.owner() {
                            owner.post_addressed(reply, requester).await;
                        }
                    },
                );
            })
        };

        // A second registration on the topic replaces the first.
        let replaced: Vec<Option<ListenerId>> = {
            let mut table = self.shared.table.lock();
            table
                .topics
                .get_mut(topic)
                .map(|entries| {
                    let mut replaced = Vec::new();
                    entries.retain_mut(|entry| {
                        if entry.kind != EntryKind::Reply {
                            return true;
                        }
                        entry.binding.released.store(true, Ordering::Release);
                        replaced.push(entry.attached.take());
                        false
                    });
                    replaced
                })
                .unwrap_or_default()
        };
        if !replaced.is_empty() {
            debug!(topic, "Replacing scoped reply handler");
        }
        for attached in replaced {
            self.shared.detach(attached);
        }

        self.shared
            .insert(topic, EntryKind::Reply, binding.clone(), listener);
        Ok(Unsubscribe::new(move || binding.release()))
    }
}
