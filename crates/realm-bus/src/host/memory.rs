//! # In-Memory Browser
//!
//! A single-process stand-in for the extension host. It keeps the delivery
//! rules the bus depends on:
//!
//! - runtime posts from an extension page reach every *other* extension page,
//!   never page realms;
//! - runtime posts from a content script reach extension pages, with the tab
//!   as sender;
//! - runtime posts from a foreign frame reach extension pages with the frame's
//!   URL as sender and no tab, and extension pages' posts reach it back;
//! - tab-addressed posts reach only the content scripts of that tab's current
//!   document generation;
//! - window posts reach every listener of the same document, the poster's own
//!   included.
//!
//! Back/forward-cache churn is modelled per tab: [`MemoryBrowser::evict`]
//! freezes the content-script runtime, [`MemoryBrowser::restore`] starts a new
//! runtime generation so ports handed out before it go dead.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    DocumentId, HostPorts, ListenerId, MessageChannel, MessageListener, MessageSender,
    PageLifecycleEvent, RuntimePort, TabId, TabInfo, TabsPort, WindowPort,
};
use crate::envelope::Envelope;

const LIFECYCLE_CAPACITY: usize = 16;

/// Where a runtime port lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Context {
    /// An extension page (background worker, popup) with its frame id.
    Extension { path: String, frame: u64 },
    /// The content script of a tab, for one runtime generation.
    Page { tab: TabId, generation: u64 },
    /// A frame outside the extension holding a runtime port onto it.
    Foreign { url: String },
}

struct RuntimeSlot {
    id: ListenerId,
    context: Context,
    listener: MessageListener,
}

struct WindowSlot {
    id: ListenerId,
    document: DocumentId,
    listener: MessageListener,
}

struct TabState {
    url: String,
    document: DocumentId,
    generation: u64,
    frozen: bool,
    lifecycle: broadcast::Sender<PageLifecycleEvent>,
}

struct BrowserState {
    extension_id: String,
    next_id: AtomicU64,
    runtime_listeners: RwLock<Vec<RuntimeSlot>>,
    window_listeners: RwLock<Vec<WindowSlot>>,
    tabs: RwLock<HashMap<TabId, TabState>>,
    focused: RwLock<Option<TabId>>,
}

impl BrowserState {
    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn base_url(&self) -> String {
        format!("chrome-extension://{}/", self.extension_id)
    }

    fn extension_sender(&self, path: &str) -> MessageSender {
        let base = self.base_url();
        MessageSender {
            id: Some(self.extension_id.clone()),
            url: Some(format!("{base}{path}")),
            tab: None,
            document: None,
        }
    }

    /// Sender for a page context, or `None` if that context is no longer live.
    fn page_sender(&self, tab: TabId, generation: u64) -> Option<MessageSender> {
        let tabs = self.tabs.read();
        let state = tabs.get(&tab)?;
        if state.frozen || state.generation != generation {
            return None;
        }
        Some(MessageSender {
            id: Some(self.extension_id.clone()),
            url: Some(state.url.clone()),
            tab: Some(TabInfo {
                id: tab,
                url: Some(state.url.clone()),
            }),
            document: Some(state.document),
        })
    }

    fn dispatch_runtime(
        &self,
        envelope: &Envelope,
        sender: &MessageSender,
        accept: impl Fn(&Context) -> bool,
    ) -> usize {
        let targets: Vec<MessageListener> = self
            .runtime_listeners
            .read()
            .iter()
            .filter(|slot| accept(&slot.context))
            .map(|slot| slot.listener.clone())
            .collect();
        for listener in &targets {
            listener(envelope, sender);
        }
        targets.len()
    }
}

/// Simulated extension host.
#[derive(Clone)]
pub struct MemoryBrowser {
    state: Arc<BrowserState>,
}

impl MemoryBrowser {
    /// Create a browser with the extension `extension_id` installed.
    #[must_use]
    pub fn new(extension_id: impl Into<String>) -> Self {
        Self {
            state: Arc::new(BrowserState {
                extension_id: extension_id.into(),
                next_id: AtomicU64::new(1),
                runtime_listeners: RwLock::new(Vec::new()),
                window_listeners: RwLock::new(Vec::new()),
                tabs: RwLock::new(HashMap::new()),
                focused: RwLock::new(None),
            }),
        }
    }

    /// Base address of the extension namespace, e.g. `chrome-extension://id/`.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.state.base_url()
    }

    /// Primitives of the background worker.
    #[must_use]
    pub fn background(&self) -> HostPorts {
        self.extension_page("background.js")
    }

    /// Primitives of the popup.
    #[must_use]
    pub fn popup(&self) -> HostPorts {
        self.extension_page("popup.html")
    }

    /// Primitives of an arbitrary extension page at `path`.
    #[must_use]
    pub fn extension_page(&self, path: &str) -> HostPorts {
        let context = Context::Extension {
            path: path.to_owned(),
            frame: self.state.next(),
        };
        HostPorts {
            runtime: Some(Arc::new(MemoryRuntime {
                state: self.state.clone(),
                context: context.clone(),
            })),
            tabs: Some(Arc::new(MemoryTabs {
                state: self.state.clone(),
                context,
            })),
            window: None,
        }
    }

    /// Runtime primitive of a frame at `url` outside the extension, such as
    /// an externally connectable page. Its posts carry no tab.
    #[must_use]
    pub fn foreign_frame(&self, url: impl Into<String>) -> HostPorts {
        HostPorts {
            runtime: Some(Arc::new(MemoryRuntime {
                state: self.state.clone(),
                context: Context::Foreign { url: url.into() },
            })),
            tabs: None,
            window: None,
        }
    }

    /// Open a tab on `url` and focus it.
    pub fn open_tab(&self, url: impl Into<String>) -> TabId {
        let id = TabId::try_from(self.state.next()).unwrap_or(TabId::MAX);
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        self.state.tabs.write().insert(
            id,
            TabState {
                url: url.into(),
                document: self.state.next(),
                generation: 0,
                frozen: false,
                lifecycle,
            },
        );
        *self.state.focused.write() = Some(id);
        id
    }

    /// Focus `tab`. Returns false for an unknown tab.
    pub fn focus(&self, tab: TabId) -> bool {
        if !self.state.tabs.read().contains_key(&tab) {
            return false;
        }
        *self.state.focused.write() = Some(tab);
        true
    }

    /// Primitives of the content script attached to `tab`.
    #[must_use]
    pub fn content_script(&self, tab: TabId) -> Option<HostPorts> {
        let runtime = self.content_runtime(tab)?;
        let window = self.window(tab)?;
        Some(HostPorts {
            runtime: Some(runtime),
            tabs: None,
            window: Some(window),
        })
    }

    /// Primitives of the script injected into `tab`'s page.
    #[must_use]
    pub fn inpage(&self, tab: TabId) -> Option<HostPorts> {
        Some(HostPorts {
            runtime: None,
            tabs: None,
            window: Some(self.window(tab)?),
        })
    }

    /// A runtime port for `tab`'s content script, bound to the current
    /// generation.
    #[must_use]
    pub fn content_runtime(&self, tab: TabId) -> Option<Arc<dyn RuntimePort>> {
        let generation = self.state.tabs.read().get(&tab)?.generation;
        Some(Arc::new(MemoryRuntime {
            state: self.state.clone(),
            context: Context::Page { tab, generation },
        }))
    }

    fn window(&self, tab: TabId) -> Option<Arc<dyn WindowPort>> {
        let document = self.state.tabs.read().get(&tab)?.document;
        Some(Arc::new(MemoryWindow {
            state: self.state.clone(),
            document,
        }))
    }

    /// Subscribe to `tab`'s lifecycle signals.
    #[must_use]
    pub fn lifecycle(&self, tab: TabId) -> Option<broadcast::Receiver<PageLifecycleEvent>> {
        Some(self.state.tabs.read().get(&tab)?.lifecycle.subscribe())
    }

    /// Put `tab` into the back/forward cache. The content-script runtime stops
    /// receiving and sending until [`restore`](Self::restore).
    pub fn evict(&self, tab: TabId) -> bool {
        let mut tabs = self.state.tabs.write();
        let Some(state) = tabs.get_mut(&tab) else {
            return false;
        };
        state.frozen = true;
        let _ = state.lifecycle.send(PageLifecycleEvent::Evicting);
        debug!(tab, "Tab entered back/forward cache");
        true
    }

    /// Bring `tab` back from the back/forward cache with a fresh runtime
    /// generation.
    pub fn restore(&self, tab: TabId) -> bool {
        let mut tabs = self.state.tabs.write();
        let Some(state) = tabs.get_mut(&tab) else {
            return false;
        };
        state.frozen = false;
        state.generation += 1;
        let _ = state.lifecycle.send(PageLifecycleEvent::Restored);
        debug!(tab, generation = state.generation, "Tab restored from back/forward cache");
        true
    }

    /// Number of runtime listeners currently registered, across all contexts.
    #[must_use]
    pub fn runtime_listener_count(&self) -> usize {
        self.state.runtime_listeners.read().len()
    }

    /// Number of window listeners currently registered, across all documents.
    #[must_use]
    pub fn window_listener_count(&self) -> usize {
        self.state.window_listeners.read().len()
    }
}

impl std::fmt::Debug for MemoryBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBrowser")
            .field("extension_id", &self.state.extension_id)
            .field("tabs", &self.state.tabs.read().len())
            .finish()
    }
}

struct MemoryRuntime {
    state: Arc<BrowserState>,
    context: Context,
}

impl MessageChannel for MemoryRuntime {
    fn post(&self, envelope: Envelope) {
        let delivered = match &self.context {
            Context::Extension { path, .. } => {
                let sender = self.state.extension_sender(path);
                self.state.dispatch_runtime(&envelope, &sender, |ctx| {
                    !matches!(ctx, Context::Page { .. }) && *ctx != self.context
                })
            }
            Context::Foreign { url } => {
                let sender = MessageSender {
                    url: Some(url.clone()),
                    ..MessageSender::default()
                };
                self.state
                    .dispatch_runtime(&envelope, &sender, |ctx| matches!(ctx, Context::Extension { .. }))
            }
            Context::Page { tab, generation } => {
                let Some(sender) = self.state.page_sender(*tab, *generation) else {
                    debug!(tab, topic = %envelope.topic, "Dropped post from inactive page context");
                    return;
                };
                self.state
                    .dispatch_runtime(&envelope, &sender, |ctx| matches!(ctx, Context::Extension { .. }))
            }
        };
        debug!(topic = %envelope.topic, receivers = delivered, "Runtime message posted");
    }

    fn add_listener(&self, listener: MessageListener) -> ListenerId {
        let id = ListenerId(self.state.next());
        self.state.runtime_listeners.write().push(RuntimeSlot {
            id,
            context: self.context.clone(),
            listener,
        });
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut slots = self.state.runtime_listeners.write();
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        slots.len() != before
    }
}

impl RuntimePort for MemoryRuntime {
    fn get_url(&self, path: &str) -> String {
        format!("{}{}", self.state.base_url(), path.trim_start_matches('/'))
    }
}

struct MemoryTabs {
    state: Arc<BrowserState>,
    context: Context,
}

#[async_trait]
impl TabsPort for MemoryTabs {
    async fn query_active(&self) -> Option<TabInfo> {
        let focused = (*self.state.focused.read())?;
        let tabs = self.state.tabs.read();
        let state = tabs.get(&focused)?;
        Some(TabInfo {
            id: focused,
            url: Some(state.url.clone()),
        })
    }

    fn send_message(&self, tab: TabId, envelope: Envelope) {
        let generation = {
            let tabs = self.state.tabs.read();
            match tabs.get(&tab) {
                Some(state) if !state.frozen => state.generation,
                _ => {
                    debug!(tab, topic = %envelope.topic, "Dropped message to unreachable tab");
                    return;
                }
            }
        };
        let path = match &self.context {
            Context::Extension { path, .. } => path.as_str(),
            Context::Page { .. } | Context::Foreign { .. } => "",
        };
        let sender = self.state.extension_sender(path);
        let target = Context::Page { tab, generation };
        let delivered = self
            .state
            .dispatch_runtime(&envelope, &sender, |ctx| *ctx == target);
        debug!(tab, topic = %envelope.topic, receivers = delivered, "Tab message posted");
    }
}

struct MemoryWindow {
    state: Arc<BrowserState>,
    document: DocumentId,
}

impl MessageChannel for MemoryWindow {
    fn post(&self, envelope: Envelope) {
        let url = self
            .state
            .tabs
            .read()
            .values()
            .find(|tab| tab.document == self.document)
            .map(|tab| tab.url.clone());
        let sender = MessageSender {
            id: None,
            url,
            tab: None,
            document: Some(self.document),
        };
        let targets: Vec<MessageListener> = self
            .state
            .window_listeners
            .read()
            .iter()
            .filter(|slot| slot.document == self.document)
            .map(|slot| slot.listener.clone())
            .collect();
        for listener in &targets {
            listener(&envelope, &sender);
        }
        debug!(topic = %envelope.topic, receivers = targets.len(), "Window message posted");
    }

    fn add_listener(&self, listener: MessageListener) -> ListenerId {
        let id = ListenerId(self.state.next());
        self.state.window_listeners.write().push(WindowSlot {
            id,
            document: self.document,
            listener,
        });
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut slots = self.state.window_listeners.write();
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        slots.len() != before
    }
}

impl WindowPort for MemoryWindow {
    fn document(&self) -> DocumentId {
        self.document
    }
}
