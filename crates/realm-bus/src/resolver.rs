//! # Connection Resolver
//!
//! Picks the transport that connects two realms.
//!
//! ## Connection Table
//!
//! | Realm A       | Realm B       | Transport  | Origin check |
//! |---------------|---------------|------------|--------------|
//! | background    | popup         | RealmWide  | yes          |
//! | popup         | contentscript | Scoped     | no           |
//! | background    | contentscript | Scoped     | no           |
//! | contentscript | inpage        | Page       | no           |
//! | popup         | inpage        | Bridge     | no           |
//! | background    | inpage        | Bridge     | no           |
//!
//! The table is undirected. Any other pair, a realm with itself included, has
//! no connection.

use std::sync::Arc;
use tracing::debug;

use crate::config::BusConfig;
use crate::error::BusError;
use crate::host::{HostPorts, RuntimePort};
use crate::messenger::Messenger;
use crate::origin::OriginGuard;
use crate::realm::Realm;
use crate::transport::{
    ActiveTabTracker, BridgeRelay, BridgeTransport, PageTransport, RuntimeTransport,
    ScopedTransport, Transport,
};

/// The kind of transport joining a pair of realms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    RealmWide,
    Scoped,
    Page,
    Bridge,
}

/// One row of the connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub a: Realm,
    pub b: Realm,
    pub kind: TransportKind,
    /// Reply handlers on this connection only serve extension senders.
    pub validate_origin: bool,
}

impl Connection {
    const fn new(a: Realm, b: Realm, kind: TransportKind, validate_origin: bool) -> Self {
        Self {
            a,
            b,
            kind,
            validate_origin,
        }
    }

    /// Whether this row joins `x` and `y`, in either order.
    #[must_use]
    pub fn joins(&self, x: Realm, y: Realm) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }
}

/// Every supported realm pair.
pub const CONNECTIONS: [Connection; 6] = [
    Connection::new(Realm::Background, Realm::Popup, TransportKind::RealmWide, true),
    Connection::new(Realm::Popup, Realm::ContentScript, TransportKind::Scoped, false),
    Connection::new(Realm::Background, Realm::ContentScript, TransportKind::Scoped, false),
    Connection::new(Realm::ContentScript, Realm::Inpage, TransportKind::Page, false),
    Connection::new(Realm::Popup, Realm::Inpage, TransportKind::Bridge, false),
    Connection::new(Realm::Background, Realm::Inpage, TransportKind::Bridge, false),
];

/// Look up the connection between `current` and `target`.
pub fn resolve(current: Realm, target: Realm) -> Result<Connection, BusError> {
    CONNECTIONS
        .iter()
        .find(|connection| connection.joins(current, target))
        .copied()
        .ok_or(BusError::NoConnection {
            from: current,
            to: target,
        })
}

/// The transports of one realm, built once at start-up.
pub struct RealmTransports {
    realm: Realm,
    config: BusConfig,
    runtime_port: Option<Arc<dyn RuntimePort>>,
    runtime: Arc<dyn Transport>,
    scoped: Arc<dyn Transport>,
    page: Arc<dyn Transport>,
    bridge: Arc<dyn Transport>,
}

impl RealmTransports {
    /// Build every transport for `realm` from its host primitives.
    #[must_use]
    pub fn new(realm: Realm, ports: &HostPorts, config: BusConfig) -> Self {
        let scoped = Arc::new(ScopedTransport::new(
            ports,
            ActiveTabTracker::new(config.eligible_page_prefixes.clone()),
        ));
        Self::with_scoped(realm, ports, config, scoped)
    }

    /// Like [`new`](Self::new) with a caller-provided scoped transport, such
    /// as a [`LiveScoped`](crate::LiveScoped) in the content script.
    #[must_use]
    pub fn with_scoped(
        realm: Realm,
        ports: &HostPorts,
        config: BusConfig,
        scoped: Arc<dyn Transport>,
    ) -> Self {
        let page: Arc<dyn Transport> = Arc::new(PageTransport::new(ports));
        let bridge: Arc<dyn Transport> =
            Arc::new(BridgeTransport::new(scoped.clone(), page.clone()));
        debug!(
            realm = %realm,
            runtime = ports.runtime.is_some(),
            tabs = ports.tabs.is_some(),
            window = ports.window.is_some(),
            "Realm transports built"
        );
        Self {
            realm,
            config,
            runtime_port: ports.runtime.clone(),
            runtime: Arc::new(RuntimeTransport::new(ports)),
            scoped,
            page,
            bridge,
        }
    }

    #[must_use]
    pub fn realm(&self) -> Realm {
        self.realm
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// The transport of `kind` in this realm, unguarded.
    #[must_use]
    pub fn transport(&self, kind: TransportKind) -> Arc<dyn Transport> {
        match kind {
            TransportKind::RealmWide => self.runtime.clone(),
            TransportKind::Scoped => self.scoped.clone(),
            TransportKind::Page => self.page.clone(),
            TransportKind::Bridge => self.bridge.clone(),
        }
    }

    /// A messenger talking to `target`, or [`BusError::NoConnection`] if the
    /// two realms are not connected.
    pub fn initialize_messenger(&self, target: Realm) -> Result<Messenger, BusError> {
        let connection = resolve(self.realm, target)?;
        let mut transport = self.transport(connection.kind);
        if connection.validate_origin {
            transport = Arc::new(OriginGuard::new(
                transport,
                self.runtime_port.clone(),
                self.config.invalid_origin_message.clone(),
            ));
        }
        debug!(
            from = %self.realm,
            to = %target,
            transport = transport.name(),
            "Messenger initialized"
        );
        Ok(Messenger::new(transport, self.realm, target))
    }

    /// Install the bridge relay when running in the content script with the
    /// relay enabled. Other realms get `None`.
    pub fn install_relay(&self) -> Result<Option<BridgeRelay>, BusError> {
        if self.realm != Realm::ContentScript || !self.config.install_relay {
            return Ok(None);
        }
        BridgeRelay::install(self.page.clone(), self.scoped.clone()).map(Some)
    }
}

impl std::fmt::Debug for RealmTransports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealmTransports")
            .field("realm", &self.realm)
            .field("runtime", &self.runtime.available())
            .field("scoped", &self.scoped.available())
            .field("page", &self.page.available())
            .field("bridge", &self.bridge.available())
            .finish()
    }
}
