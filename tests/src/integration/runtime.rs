//! # Bus Runtime Scenarios
//!
//! The whole realm matrix as wired by `bus-runtime`, including page
//! lifecycle churn and more than one open tab.

#[cfg(test)]
mod tests {
    use bus_runtime::{run_smoke, SimulatedExtension};
    use realm_bus::{BusConfig, Realm, SendOptions, CONNECTIONS};

    use crate::integration::within;

    #[tokio::test]
    async fn test_smoke_covers_matrix() {
        let extension = SimulatedExtension::new("ext", BusConfig::default());
        let page = extension.open_page("https://dapp.example/").unwrap();

        let report = run_smoke(&extension, &page).await.unwrap();
        assert_eq!(report.accounts, vec!["0x5afe".to_string()]);
        assert_eq!(report.chain_id, "0x1");
        assert_eq!(report.ping, report.ping_after_restore);
        page.close();
    }

    #[tokio::test]
    async fn test_every_connection_has_a_messenger_on_both_ends() {
        let extension = SimulatedExtension::new("ext", BusConfig::default());
        let page = extension.open_page("https://dapp.example/").unwrap();

        for connection in CONNECTIONS {
            for (from, to) in [(connection.a, connection.b), (connection.b, connection.a)] {
                let transports = match from {
                    Realm::Background => extension.background(),
                    Realm::Popup => extension.popup(),
                    Realm::ContentScript => page.content(),
                    Realm::Inpage => page.inpage(),
                };
                let messenger = transports.initialize_messenger(to).unwrap();
                assert!(messenger.available(), "{from} -> {to} unavailable");
            }
        }
    }

    #[tokio::test]
    async fn test_scoped_sends_follow_the_focused_tab() {
        let extension = SimulatedExtension::new("ext", BusConfig::default());
        let first = extension.open_page("https://one.example/").unwrap();
        let second = extension.open_page("https://two.example/").unwrap();

        for page in [&first, &second] {
            let tab = page.tab();
            page.content()
                .initialize_messenger(Realm::Background)
                .unwrap()
                .reply("whereami", move |_: (), _| async move { Ok(tab) })
                .unwrap();
        }
        let background = extension
            .background()
            .initialize_messenger(Realm::ContentScript)
            .unwrap();

        let tab: u32 = within(background.send("whereami", &(), SendOptions::correlated()))
            .await
            .unwrap();
        assert_eq!(tab, second.tab());

        extension.browser().focus(first.tab());
        let tab: u32 = within(background.send("whereami", &(), SendOptions::correlated()))
            .await
            .unwrap();
        assert_eq!(tab, first.tab());
    }

    #[tokio::test]
    async fn test_ineligible_focused_tab_keeps_last_page() {
        let extension = SimulatedExtension::new("ext", BusConfig::default());
        let page = extension.open_page("https://dapp.example/").unwrap();
        let tab = page.tab();
        page.content()
            .initialize_messenger(Realm::Background)
            .unwrap()
            .reply("whereami", move |_: (), _| async move { Ok(tab) })
            .unwrap();
        let popup = extension
            .popup()
            .initialize_messenger(Realm::ContentScript)
            .unwrap();

        let seen: u32 = within(popup.send("whereami", &(), SendOptions::correlated()))
            .await
            .unwrap();
        assert_eq!(seen, tab);

        // Focus moves to a browser page no content script runs in.
        extension.browser().open_tab("chrome://settings");
        let seen: u32 = within(popup.send("whereami", &(), SendOptions::correlated()))
            .await
            .unwrap();
        assert_eq!(seen, tab);
    }
}
