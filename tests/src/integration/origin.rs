//! # Origin Validation
//!
//! Reply handlers behind an [`OriginGuard`](realm_bus::OriginGuard) only run
//! for senders inside the extension namespace.
//!
//! On the background/popup connection the runtime transport drops tab
//! senders before the guard sees them, so the guard's rejections there come
//! from frames outside the extension that reach its runtime.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use realm_bus::{
        raw_handler, BusError, Messenger, OriginGuard, Realm, RuntimeTransport, SendOptions,
        Transport, TransportKind, INVALID_ORIGIN,
    };

    use crate::integration::{within, Fixture};

    #[tokio::test]
    async fn test_page_sender_is_rejected_without_running_handler() {
        let fixture = Fixture::new();
        let guarded = OriginGuard::new(
            fixture.background.transport(TransportKind::Scoped),
            fixture.browser.background().runtime,
            INVALID_ORIGIN,
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        guarded
            .reply(
                "secret",
                raw_handler(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(json!("leaked")) }
                }),
            )
            .unwrap();

        let content = fixture
            .content
            .initialize_messenger(Realm::Background)
            .unwrap();
        let answer: serde_json::Value =
            within(content.send("secret", &(), SendOptions::correlated()))
                .await
                .unwrap();
        assert_eq!(answer, json!({ "error": "Invalid origin" }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejection_text_is_configurable() {
        let fixture = Fixture::new();
        let guarded = OriginGuard::new(
            fixture.background.transport(TransportKind::Scoped),
            fixture.browser.background().runtime,
            "origin not allowed",
        );
        guarded
            .reply("secret", raw_handler(|_, _| async move { Ok(json!(1)) }))
            .unwrap();

        let content = fixture.content.transport(TransportKind::Scoped);
        let answer = within(content.send("secret", json!(null), None))
            .await
            .unwrap();
        assert_eq!(answer, json!({ "error": "origin not allowed" }));
    }

    #[tokio::test]
    async fn test_any_extension_page_is_trusted() {
        let fixture = Fixture::new();
        let background = fixture
            .background
            .initialize_messenger(Realm::Popup)
            .unwrap();
        background
            .reply("settings", |_: (), context| async move {
                Ok(context.sender.url.unwrap_or_default())
            })
            .unwrap();

        let options = RuntimeTransport::new(&fixture.browser.extension_page("options.html"));
        let answer = within(options.send("settings", json!(null), None))
            .await
            .unwrap();
        assert_eq!(answer, json!("chrome-extension://fixture/options.html"));
    }

    #[tokio::test]
    async fn test_foreign_frame_is_rejected_on_popup_connection() {
        let fixture = Fixture::new();
        let background = fixture
            .background
            .initialize_messenger(Realm::Popup)
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        background
            .reply("wallet_getAccounts", move |_: (), _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(vec!["0x5afe".to_string()]) }
            })
            .unwrap();

        let foreign = Arc::new(RuntimeTransport::new(
            &fixture.browser.foreign_frame("https://evil.example/"),
        ));
        let raw = within(foreign.send("wallet_getAccounts", json!(null), None))
            .await
            .unwrap();
        assert_eq!(raw, json!({ "error": "Invalid origin" }));

        let messenger = Messenger::new(foreign, Realm::Popup, Realm::Background);
        let err = within(messenger.send::<_, Vec<String>>(
            "wallet_getAccounts",
            &(),
            SendOptions::correlated(),
        ))
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            BusError::Rejected { ref message, .. } if message == INVALID_ORIGIN
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
