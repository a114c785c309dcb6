//! # Bus Runtime
//!
//! Hosts every realm of one extension on a [`MemoryBrowser`] and wires them
//! the way a real extension start-up would.
//!
//! ## Wiring
//!
//! ```text
//!  background ── RealmTransports ──┐
//!  popup      ── RealmTransports ──┤ runtime / tabs
//!                                  │
//!  per page:                       ▼
//!    contentscript ── RealmTransports(with LiveScoped) ── BridgeRelay
//!         ▲  lifecycle listener (evict / restore)
//!         │ window
//!    inpage ── RealmTransports
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Build background and popup transports from the extension pages
//! 2. Per opened page, build the content script around a [`LiveScoped`]
//! 3. Install the bridge relay in the content script (if enabled)
//! 4. Spawn the lifecycle listener that migrates scoped listeners on restore
//! 5. Build the inpage transports

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use realm_bus::{
    ActiveTabTracker, BridgeRelay, BusConfig, HostPorts, LiveScoped, MemoryBrowser, Messenger,
    Realm, RealmTransports, ScopedTransport, SendOptions, TabId, Transport,
};

/// How long a lifecycle transition may take to be picked up.
const LIFECYCLE_WAIT: Duration = Duration::from_secs(1);

/// How long one smoke-scenario exchange may take.
const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// One simulated extension: its host, its extension pages and its config.
pub struct SimulatedExtension {
    browser: MemoryBrowser,
    config: BusConfig,
    background: RealmTransports,
    popup: RealmTransports,
}

impl SimulatedExtension {
    /// Install the extension `extension_id` into a fresh browser.
    pub fn new(extension_id: &str, config: BusConfig) -> Self {
        let browser = MemoryBrowser::new(extension_id);
        let background =
            RealmTransports::new(Realm::Background, &browser.background(), config.clone());
        let popup = RealmTransports::new(Realm::Popup, &browser.popup(), config.clone());
        info!(extension = %extension_id, "Extension realms wired");
        Self {
            browser,
            config,
            background,
            popup,
        }
    }

    pub fn browser(&self) -> &MemoryBrowser {
        &self.browser
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn background(&self) -> &RealmTransports {
        &self.background
    }

    pub fn popup(&self) -> &RealmTransports {
        &self.popup
    }

    /// Open `url` in a new focused tab and start its content script and
    /// inpage script.
    pub fn open_page(&self, url: &str) -> Result<PageSession> {
        let tab = self.browser.open_tab(url);

        let factory = {
            let browser = self.browser.clone();
            let prefixes = self.config.eligible_page_prefixes.clone();
            move || {
                let runtime = browser.content_runtime(tab)?;
                let ports = HostPorts {
                    runtime: Some(runtime),
                    ..HostPorts::default()
                };
                Some(ScopedTransport::new(
                    &ports,
                    ActiveTabTracker::new(prefixes.clone()),
                ))
            }
        };
        let initial = factory().context("content script runtime unavailable")?;
        let live = Arc::new(LiveScoped::new(initial, factory));

        let content_ports = self
            .browser
            .content_script(tab)
            .context("content script ports unavailable")?;
        let content = RealmTransports::with_scoped(
            Realm::ContentScript,
            &content_ports,
            self.config.clone(),
            live.clone() as Arc<dyn Transport>,
        );
        let relay = content
            .install_relay()
            .context("failed to install bridge relay")?;

        let events = self
            .browser
            .lifecycle(tab)
            .context("page lifecycle unavailable")?;
        let lifecycle_task = live.spawn_lifecycle_listener(events);

        let inpage_ports = self
            .browser
            .inpage(tab)
            .context("inpage ports unavailable")?;
        let inpage = RealmTransports::new(Realm::Inpage, &inpage_ports, self.config.clone());

        info!(tab, url, relay = relay.is_some(), "Page realms wired");
        Ok(PageSession {
            browser: self.browser.clone(),
            tab,
            content,
            inpage,
            live,
            relay,
            lifecycle_task,
        })
    }
}

impl std::fmt::Debug for SimulatedExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedExtension")
            .field("browser", &self.browser)
            .field("config", &self.config)
            .finish()
    }
}

/// The page-side realms of one tab.
pub struct PageSession {
    browser: MemoryBrowser,
    tab: TabId,
    content: RealmTransports,
    inpage: RealmTransports,
    live: Arc<LiveScoped>,
    relay: Option<BridgeRelay>,
    lifecycle_task: JoinHandle<()>,
}

impl PageSession {
    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn content(&self) -> &RealmTransports {
        &self.content
    }

    pub fn inpage(&self) -> &RealmTransports {
        &self.inpage
    }

    pub fn live_scoped(&self) -> &Arc<LiveScoped> {
        &self.live
    }

    pub fn has_relay(&self) -> bool {
        self.relay.is_some()
    }

    /// Send the tab into the back/forward cache and wait for the content
    /// script to detach.
    pub async fn evict(&self) -> Result<()> {
        let current = self.live.current();
        anyhow::ensure!(self.browser.evict(self.tab), "tab {} is gone", self.tab);
        wait_until(|| current.is_stopped())
            .await
            .context("content script did not stop its listeners")
    }

    /// Bring the tab back and wait for the content script to migrate.
    pub async fn restore(&self) -> Result<()> {
        let before = self.live.current();
        anyhow::ensure!(self.browser.restore(self.tab), "tab {} is gone", self.tab);
        wait_until(|| !Arc::ptr_eq(&before, &self.live.current()))
            .await
            .context("content script did not migrate after restore")
    }

    /// Stop the relay and the lifecycle listener.
    pub fn close(self) {
        if let Some(relay) = self.relay {
            relay.uninstall();
        }
        self.lifecycle_task.abort();
        debug!(tab = self.tab, "Page session closed");
    }
}

async fn wait_until(condition: impl Fn() -> bool) -> Result<()> {
    tokio::time::timeout(LIFECYCLE_WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .context("lifecycle transition timed out")
}

/// What the smoke scenario observed on each connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeReport {
    /// popup → background (realm-wide, origin checked)
    pub accounts: Vec<String>,
    /// background → contentscript (scoped)
    pub ping: String,
    /// popup → inpage (bridge over scoped, relayed)
    pub chain_id: String,
    /// inpage → background (bridge over page, relayed)
    pub requested_accounts: Vec<String>,
    /// background → contentscript after a back/forward-cache round trip
    pub ping_after_restore: String,
}

/// Exercise every connection of the realm matrix once, including a cache
/// eviction and restore of the page.
pub async fn run_smoke(extension: &SimulatedExtension, page: &PageSession) -> Result<SmokeReport> {
    let background_to_popup = extension.background().initialize_messenger(Realm::Popup)?;
    let popup_to_background = extension.popup().initialize_messenger(Realm::Background)?;
    let background_to_content = extension
        .background()
        .initialize_messenger(Realm::ContentScript)?;
    let background_to_inpage = extension.background().initialize_messenger(Realm::Inpage)?;
    let popup_to_inpage = extension.popup().initialize_messenger(Realm::Inpage)?;
    let content_to_background = page.content().initialize_messenger(Realm::Background)?;
    let inpage_to_background = page.inpage().initialize_messenger(Realm::Background)?;

    background_to_popup.reply("wallet_getAccounts", |_: (), _| async move {
        Ok(vec!["0x5afe".to_string()])
    })?;
    background_to_inpage.reply("wallet_requestAccounts", |origin: String, _| async move {
        Ok(vec![format!("0x5afe@{origin}")])
    })?;
    content_to_background.reply("page_ping", |_: (), context| async move {
        Ok(format!("pong from {}", context.sender.url.unwrap_or_default()))
    })?;
    inpage_to_background.reply("eth_chainId", |_: (), _| async move { Ok("0x1".to_string()) })?;

    let accounts: Vec<String> = step(&popup_to_background, "wallet_getAccounts", &()).await?;
    let ping: String = step(&background_to_content, "page_ping", &()).await?;
    let chain_id: String = step(&popup_to_inpage, "eth_chainId", &()).await?;
    let requested_accounts: Vec<String> =
        step(&inpage_to_background, "wallet_requestAccounts", "dapp.example").await?;

    page.evict().await?;
    page.restore().await?;
    let ping_after_restore: String = step(&background_to_content, "page_ping", &()).await?;

    Ok(SmokeReport {
        accounts,
        ping,
        chain_id,
        requested_accounts,
        ping_after_restore,
    })
}

async fn step<P, R>(messenger: &Messenger, topic: &str, payload: &P) -> Result<R>
where
    P: Serialize + ?Sized,
    R: serde::de::DeserializeOwned,
{
    let response = tokio::time::timeout(
        STEP_TIMEOUT,
        messenger.send(topic, payload, SendOptions::correlated()),
    )
    .await
    .with_context(|| {
        format!(
            "{} -> {} '{topic}' timed out",
            messenger.realm(),
            messenger.target()
        )
    })?
    .with_context(|| format!("{} -> {} '{topic}' failed", messenger.realm(), messenger.target()))?;
    info!(
        from = %messenger.realm(),
        to = %messenger.target(),
        via = messenger.transport_name(),
        topic,
        "Exchange completed"
    );
    Ok(response)
}
