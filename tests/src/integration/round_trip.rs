//! # Round Trip Scenarios
//!
//! Request/reply correlation across the realm-wide and scoped transports.
//!
//! 1. **popup → background**: reply registered before the request
//! 2. **background → contentscript**: concurrent sends on one topic
//! 3. **Error propagation**: a failing handler surfaces as a remote error

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;
    use serde_json::json;

    use realm_bus::envelope::reply_topic;
    use realm_bus::{
        is_reply_envelope, BusError, Envelope, MessageId, Realm, SendOptions,
    };

    use crate::integration::{within, Fixture};

    // =============================================================================
    // CORRELATION
    // =============================================================================

    #[tokio::test]
    async fn test_popup_reaches_background() {
        let fixture = Fixture::new();
        let background = fixture
            .background
            .initialize_messenger(Realm::Popup)
            .unwrap();
        let popup = fixture
            .popup
            .initialize_messenger(Realm::Background)
            .unwrap();

        background
            .reply("add", |(a, b): (i64, i64), _| async move { Ok(a + b) })
            .unwrap();

        let sum: i64 = within(popup.send("add", &(2, 3), SendOptions::correlated()))
            .await
            .unwrap();
        assert_eq!(sum, 5);
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_cross_talk() {
        let fixture = Fixture::new();
        let content = fixture
            .content
            .initialize_messenger(Realm::Background)
            .unwrap();
        let background = fixture
            .background
            .initialize_messenger(Realm::ContentScript)
            .unwrap();

        // Later requests finish first.
        content
            .reply("double", |n: u64, _| async move {
                tokio::time::sleep(Duration::from_millis(30 - n * 3)).await;
                Ok(n * 2)
            })
            .unwrap();

        let sends = (0..8u64).map(|n| {
            let background = background.clone();
            async move {
                let doubled: u64 = background
                    .send("double", &n, SendOptions::with_id(n as i64))
                    .await
                    .unwrap();
                (n, doubled)
            }
        });
        for (n, doubled) in within(join_all(sends)).await {
            assert_eq!(doubled, n * 2);
        }
    }

    #[tokio::test]
    async fn test_text_and_numeric_ids_both_correlate() {
        let fixture = Fixture::new();
        let background = fixture
            .background
            .initialize_messenger(Realm::Popup)
            .unwrap();
        let popup = fixture
            .popup
            .initialize_messenger(Realm::Background)
            .unwrap();
        background
            .reply("echo", |value: serde_json::Value, _| async move { Ok(value) })
            .unwrap();

        let text: String = within(popup.send("echo", "a", SendOptions::with_id("req-a")))
            .await
            .unwrap();
        let number: i64 = within(popup.send("echo", &7, SendOptions::with_id(7)))
            .await
            .unwrap();
        assert_eq!(text, "a");
        assert_eq!(number, 7);
    }

    #[test]
    fn test_reply_envelope_requires_matching_id() {
        let reply = Envelope {
            topic: reply_topic("echo"),
            payload: json!({ "response": 1 }),
            id: Some(MessageId::from(1)),
        };
        assert!(is_reply_envelope(Some(&MessageId::from(1)), "echo", &reply));
        assert!(!is_reply_envelope(Some(&MessageId::from(2)), "echo", &reply));
        assert!(!is_reply_envelope(Some(&MessageId::from("1")), "echo", &reply));
        assert!(is_reply_envelope(None, "echo", &reply));
        assert!(!is_reply_envelope(None, "other", &reply));
    }

    // =============================================================================
    // ERRORS
    // =============================================================================

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let fixture = Fixture::new();
        let content = fixture
            .content
            .initialize_messenger(Realm::Background)
            .unwrap();
        let background = fixture
            .background
            .initialize_messenger(Realm::ContentScript)
            .unwrap();

        content
            .reply("explode", |_: (), _| async move {
                Err::<(), _>(anyhow::anyhow!("boom"))
            })
            .unwrap();

        let err = within(background.send::<_, ()>("explode", &(), SendOptions::correlated()))
            .await
            .unwrap_err();
        let remote = err.as_remote().expect("remote error");
        assert_eq!(remote.name, "Error");
        assert_eq!(remote.message, "boom");
    }

    #[tokio::test]
    async fn test_unconnected_realms_fail_at_initialization() {
        let fixture = Fixture::new();
        let err = fixture
            .inpage
            .initialize_messenger(Realm::Inpage)
            .unwrap_err();
        assert!(matches!(
            err,
            BusError::NoConnection {
                from: Realm::Inpage,
                to: Realm::Inpage
            }
        ));
    }
}
