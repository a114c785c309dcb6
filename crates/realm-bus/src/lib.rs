//! # Realm Bus - Cross-Context Message Bus
//!
//! Correlated request/reply messaging between the isolated script realms of a
//! browser extension.
//!
//! ## Realms and Primitives
//!
//! ```text
//!  ┌────────────┐   runtime (broadcast)   ┌────────────┐
//!  │ background │ ◄─────────────────────► │   popup    │
//!  └─────┬──────┘                         └─────┬──────┘
//!        │ tabs + runtime (scoped)              │ tabs + runtime (scoped)
//!        ▼                                      ▼
//!  ┌──────────────────────────────────────────────────┐
//!  │                  contentscript                   │
//!  │            [BridgeRelay: scoped ⇄ page]          │
//!  └──────────────────────┬───────────────────────────┘
//!                         │ window.postMessage (page)
//!                         ▼
//!                   ┌────────────┐
//!                   │   inpage   │
//!                   └────────────┘
//! ```
//!
//! None of the host primitives correlate replies with requests. The bus
//! writes directional envelopes (`"> topic"` / `"< topic"`), matches replies
//! by `(topic, id)` and relays across the content script when two realms
//! have no direct line.
//!
//! ## Entry Point
//!
//! Build a [`RealmTransports`] once per realm from its [`HostPorts`], then call
//! [`RealmTransports::initialize_messenger`] with the realm to talk to.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod envelope;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod messenger;
pub mod origin;
pub mod realm;
pub mod resolver;
pub mod transport;

// Re-export main types
pub use config::BusConfig;
pub use envelope::{is_reply_envelope, is_request_envelope, Envelope, MessageId, ReplyPayload};
pub use error::{to_serializable, BusError, RemoteError, SerializedError};
pub use host::{HostPorts, MemoryBrowser, MessageSender, PageLifecycleEvent, TabId, TabInfo};
pub use lifecycle::LiveScoped;
pub use messenger::{Messenger, SendOptions};
pub use origin::OriginGuard;
pub use realm::Realm;
pub use resolver::{resolve, Connection, RealmTransports, TransportKind, CONNECTIONS};
pub use transport::{
    raw_handler, ActiveTabTracker, BridgeRelay, BridgeTransport, PageTransport, RawHandler,
    ReplyContext, RuntimeTransport, ScopedTransport, Transport, Unsubscribe,
};

/// Marker prefixed to the topic of a request envelope.
pub const REQUEST_MARKER: char = '>';

/// Marker prefixed to the topic of a reply envelope.
pub const REPLY_MARKER: char = '<';

/// Topic that matches every request, used by relays.
pub const WILDCARD_TOPIC: &str = "*";

/// Response sent when a request fails origin validation.
pub const INVALID_ORIGIN: &str = "Invalid origin";
