//! # Integration Tests
//!
//! Every scenario builds a fresh [`MemoryBrowser`] so tests never share
//! listeners.

pub mod origin;
pub mod relay;
pub mod round_trip;
pub mod runtime;
pub mod scoped_lifecycle;

use std::future::Future;
use std::time::Duration;

use realm_bus::{BusConfig, MemoryBrowser, Realm, RealmTransports, TabId};

/// Upper bound for any single exchange in these tests.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Await `future`, failing the test if it takes longer than
/// [`EXCHANGE_TIMEOUT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(EXCHANGE_TIMEOUT, future)
        .await
        .expect("exchange timed out")
}

/// The realms of one extension with a single open page.
pub struct Fixture {
    pub browser: MemoryBrowser,
    pub tab: TabId,
    pub background: RealmTransports,
    pub popup: RealmTransports,
    pub content: RealmTransports,
    pub inpage: RealmTransports,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        let browser = MemoryBrowser::new("fixture");
        let tab = browser.open_tab("https://dapp.example/");
        let background =
            RealmTransports::new(Realm::Background, &browser.background(), config.clone());
        let popup = RealmTransports::new(Realm::Popup, &browser.popup(), config.clone());
        let content = RealmTransports::new(
            Realm::ContentScript,
            &browser.content_script(tab).expect("content script"),
            config.clone(),
        );
        let inpage = RealmTransports::new(
            Realm::Inpage,
            &browser.inpage(tab).expect("inpage"),
            config,
        );
        Self {
            browser,
            tab,
            background,
            popup,
            content,
            inpage,
        }
    }
}
