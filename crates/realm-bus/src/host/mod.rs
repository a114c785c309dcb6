//! # Host Primitives
//!
//! The messaging primitives the host hands each realm. None of them correlate
//! replies with requests; that is the bus's job.
//!
//! | Primitive        | Trait          | Present in                           |
//! |------------------|----------------|--------------------------------------|
//! | runtime messages | [`RuntimePort`]| background, popup, contentscript     |
//! | tab addressing   | [`TabsPort`]   | background, popup                    |
//! | window messages  | [`WindowPort`] | contentscript, inpage                |
//!
//! Listeners are plain callbacks. A channel dispatches to a snapshot of its
//! listeners, so a listener may add or remove listeners while running.

mod memory;

pub use memory::MemoryBrowser;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::envelope::Envelope;

/// Host tab identifier.
pub type TabId = u32;

/// Identifier of one loaded document.
pub type DocumentId = u64;

/// A page as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub url: Option<String>,
}

/// Who posted a message, as described by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    /// Extension id of the sending context.
    pub id: Option<String>,
    /// URL of the sending frame.
    pub url: Option<String>,
    /// Tab the message came from, for page realms.
    pub tab: Option<TabInfo>,
    /// Document the message came from, for window messages.
    pub document: Option<DocumentId>,
}

/// Callback invoked for every message a channel delivers.
pub type MessageListener = Arc<dyn Fn(&Envelope, &MessageSender) + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// A fire-and-forget message channel with listener registration.
pub trait MessageChannel: Send + Sync {
    /// Post an envelope; delivery rules depend on the primitive.
    fn post(&self, envelope: Envelope);

    /// Register a listener.
    fn add_listener(&self, listener: MessageListener) -> ListenerId;

    /// Remove a listener. Returns false if it was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Extension-wide runtime messaging (`runtime.sendMessage` / `onMessage`).
///
/// Posting from an extension page reaches every other extension page; posting
/// from a page realm reaches the extension pages with the tab as sender.
pub trait RuntimePort: MessageChannel {
    /// Absolute URL of `path` inside the extension's namespace.
    fn get_url(&self, path: &str) -> String;
}

/// Tab queries and tab-addressed delivery (`tabs.query` / `tabs.sendMessage`).
#[async_trait]
pub trait TabsPort: Send + Sync {
    /// The active tab of the last focused window, if any.
    async fn query_active(&self) -> Option<TabInfo>;

    /// Deliver to the page realms attached to `tab`.
    fn send_message(&self, tab: TabId, envelope: Envelope);
}

/// Same-document messaging (`window.postMessage`). Posts reach every listener
/// of the document, the poster's own included.
pub trait WindowPort: MessageChannel {
    /// The document this window belongs to.
    fn document(&self) -> DocumentId;
}

/// The primitives present in one realm.
#[derive(Clone, Default)]
pub struct HostPorts {
    pub runtime: Option<Arc<dyn RuntimePort>>,
    pub tabs: Option<Arc<dyn TabsPort>>,
    pub window: Option<Arc<dyn WindowPort>>,
}

impl std::fmt::Debug for HostPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPorts")
            .field("runtime", &self.runtime.is_some())
            .field("tabs", &self.tabs.is_some())
            .field("window", &self.window.is_some())
            .finish()
    }
}

/// Page lifecycle signals delivered to the page-attached realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageLifecycleEvent {
    /// The page came back from the back/forward cache.
    Restored,
    /// The page is about to enter the back/forward cache.
    Evicting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_ports_debug() {
        let ports = HostPorts::default();
        assert_eq!(
            format!("{ports:?}"),
            "HostPorts { runtime: false, tabs: false, window: false }"
        );
    }
}
