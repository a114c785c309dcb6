//! # Page Lifecycle
//!
//! A content script can be frozen into the back/forward cache and brought
//! back with a new runtime, while the page around it never unloads.
//! [`LiveScoped`] hides that churn: it holds the current
//! [`ScopedTransport`] and, on the host's lifecycle signals, detaches it
//! (evicting) or moves its registrations into a fresh one (restored).
//!
//! ```text
//! Evicting ──► current.stop_listeners()
//! Restored ──► fresh = factory(); current.migrate_listeners(&fresh); current = fresh
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::envelope::MessageId;
use crate::error::BusError;
use crate::host::PageLifecycleEvent;
use crate::transport::{RawHandler, ScopedTransport, Transport, Unsubscribe};

type ScopedFactory = Box<dyn Fn() -> Option<ScopedTransport> + Send + Sync>;

/// The content script's scoped transport, kept alive across cache restores.
pub struct LiveScoped {
    current: RwLock<Arc<ScopedTransport>>,
    factory: ScopedFactory,
}

impl LiveScoped {
    /// Start from `initial`; `factory` builds the replacement after a restore
    /// and returns `None` when the page is gone.
    #[must_use]
    pub fn new(
        initial: ScopedTransport,
        factory: impl Fn() -> Option<ScopedTransport> + Send + Sync + 'static,
    ) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            factory: Box::new(factory),
        }
    }

    /// The instance currently serving requests.
    #[must_use]
    pub fn current(&self) -> Arc<ScopedTransport> {
        self.current.read().clone()
    }

    /// React to one lifecycle signal.
    pub fn handle(&self, event: PageLifecycleEvent) {
        match event {
            PageLifecycleEvent::Evicting => {
                debug!("Page evicting; stopping scoped listeners");
                self.current().stop_listeners();
            }
            PageLifecycleEvent::Restored => {
                let Some(fresh) = (self.factory)() else {
                    warn!("Page restored but no runtime is available; listeners stay detached");
                    return;
                };
                let fresh = Arc::new(fresh);
                let mut current = self.current.write();
                let moved = current.migrate_listeners(&fresh);
                *current = fresh;
                info!(moved, "Scoped transport replaced after restore");
            }
        }
    }

    /// Drive [`handle`](Self::handle) from `events` until the sender closes or
    /// this transport is dropped.
    pub fn spawn_lifecycle_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<PageLifecycleEvent>,
    ) -> JoinHandle<()> {
        let live: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(live) = live.upgrade() else {
                            break;
                        };
                        live.handle(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Lifecycle listener lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Lifecycle listener stopped");
        })
    }
}

impl std::fmt::Debug for LiveScoped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveScoped")
            .field("current", &*self.current.read())
            .finish()
    }
}

#[async_trait]
impl Transport for LiveScoped {
    fn name(&self) -> &'static str {
        ScopedTransport::NAME
    }

    fn available(&self) -> bool {
        self.current().available()
    }

    async fn send(
        &self,
        topic: &str,
        payload: Value,
        id: Option<MessageId>,
    ) -> Result<Value, BusError> {
        let current = self.current();
        current.send(topic, payload, id).await
    }

    fn reply(&self, topic: &str, handler: RawHandler) -> Result<Unsubscribe, BusError> {
        // Held across the call so a restore cannot migrate in between.
        let current = self.current.read();
        current.reply(topic, handler)
    }
}
