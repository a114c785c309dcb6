//! # Bridge Relay
//!
//! The content script relays every request between the page and the
//! extension, in both directions, under the original topic and id. Requests
//! it answers itself are not relayed.
//!
//! ```text
//! inpage ──page──► contentscript ──scoped──► background
//! popup  ──scoped─► contentscript ──page───► inpage
//! ```

#[cfg(test)]
mod tests {
    use serde_json::json;

    use realm_bus::{BusError, Realm, RemoteError, SendOptions, TransportKind};

    use crate::integration::{within, Fixture};

    #[tokio::test]
    async fn test_inpage_reaches_background_through_relay() {
        let fixture = Fixture::new();
        let _relay = fixture.content.install_relay().unwrap().expect("relay");

        let background = fixture
            .background
            .initialize_messenger(Realm::Inpage)
            .unwrap();
        let inpage = fixture
            .inpage
            .initialize_messenger(Realm::Background)
            .unwrap();
        background
            .reply("eth_accounts", |_: (), context| async move {
                Ok(json!({
                    "accounts": ["0x5afe"],
                    "tab": context.sender.tab.map(|tab| tab.id),
                }))
            })
            .unwrap();

        let answer: serde_json::Value =
            within(inpage.send("eth_accounts", &(), SendOptions::correlated()))
                .await
                .unwrap();
        assert_eq!(answer, json!({ "accounts": ["0x5afe"], "tab": fixture.tab }));
    }

    #[tokio::test]
    async fn test_background_reaches_inpage_through_relay() {
        let fixture = Fixture::new();
        let _relay = fixture.content.install_relay().unwrap().expect("relay");

        let inpage = fixture
            .inpage
            .initialize_messenger(Realm::Background)
            .unwrap();
        let background = fixture
            .background
            .initialize_messenger(Realm::Inpage)
            .unwrap();
        inpage
            .reply("page_title", |_: (), _| async move { Ok("Example dapp") })
            .unwrap();

        let title: String = within(background.send("page_title", &(), SendOptions::correlated()))
            .await
            .unwrap();
        assert_eq!(title, "Example dapp");
    }

    #[tokio::test]
    async fn test_relayed_error_keeps_its_fields() {
        let fixture = Fixture::new();
        let _relay = fixture.content.install_relay().unwrap().expect("relay");

        let inpage = fixture
            .inpage
            .initialize_messenger(Realm::Popup)
            .unwrap();
        let popup = fixture
            .popup
            .initialize_messenger(Realm::Inpage)
            .unwrap();
        inpage
            .reply("eth_sign", |_: (), _| async move {
                Err::<(), _>(anyhow::Error::from(
                    RemoteError::new("User rejected the request")
                        .with_code(4001)
                        .with_name("UserRejectedRequestError"),
                ))
            })
            .unwrap();

        let err = within(popup.send::<_, ()>("eth_sign", &(), SendOptions::correlated()))
            .await
            .unwrap_err();
        let remote = err.as_remote().expect("remote error");
        assert_eq!(remote.message, "User rejected the request");
        assert_eq!(remote.code, Some(4001));
        assert_eq!(remote.name, "UserRejectedRequestError");
    }

    #[tokio::test]
    async fn test_content_answered_requests_are_not_relayed_to_page() {
        let fixture = Fixture::new();
        let _relay = fixture.content.install_relay().unwrap().expect("relay");

        fixture
            .content
            .initialize_messenger(Realm::Background)
            .unwrap()
            .reply("page_ping", |_: (), _| async move { Ok("pong") })
            .unwrap();
        let background = fixture
            .background
            .initialize_messenger(Realm::ContentScript)
            .unwrap();

        let window_listeners = fixture.browser.window_listener_count();
        for _ in 0..20 {
            let pong: String =
                within(background.send("page_ping", &(), SendOptions::correlated()))
                    .await
                    .unwrap();
            assert_eq!(pong, "pong");
        }
        tokio::task::yield_now().await;
        assert_eq!(fixture.browser.window_listener_count(), window_listeners);
    }

    #[tokio::test]
    async fn test_content_answered_requests_are_not_relayed_to_extension() {
        let fixture = Fixture::new();
        let _relay = fixture.content.install_relay().unwrap().expect("relay");

        fixture
            .content
            .initialize_messenger(Realm::Inpage)
            .unwrap()
            .reply("page_info", |_: (), _| async move { Ok("content") })
            .unwrap();
        let inpage = fixture
            .inpage
            .initialize_messenger(Realm::ContentScript)
            .unwrap();

        let runtime_listeners = fixture.browser.runtime_listener_count();
        for _ in 0..20 {
            let info: String = within(inpage.send("page_info", &(), SendOptions::correlated()))
                .await
                .unwrap();
            assert_eq!(info, "content");
        }
        tokio::task::yield_now().await;
        assert_eq!(fixture.browser.runtime_listener_count(), runtime_listeners);
    }

    #[tokio::test]
    async fn test_uninstalled_relay_stops_forwarding() {
        let fixture = Fixture::new();
        let relay = fixture.content.install_relay().unwrap().expect("relay");
        relay.uninstall();

        let inpage = fixture.inpage.transport(TransportKind::Bridge);
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            inpage.send("eth_accounts", json!(null), None),
        )
        .await;
        assert!(pending.is_err(), "no realm should answer without the relay");
    }

    #[test]
    fn test_relay_requires_both_sides() {
        let fixture = Fixture::new();
        // The inpage realm has no runtime, so its scoped side is missing.
        let err = realm_bus::BridgeRelay::install(
            fixture.inpage.transport(TransportKind::Page),
            fixture.inpage.transport(TransportKind::Scoped),
        )
        .unwrap_err();
        assert!(matches!(err, BusError::Unavailable { transport: "scoped" }));
    }
}
