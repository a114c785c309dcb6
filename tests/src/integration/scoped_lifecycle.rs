//! # Scoped Transport Lifecycle
//!
//! Registration rules of the tab-scoped transport and its survival across a
//! back/forward-cache round trip of the page.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use realm_bus::{
        raw_handler, ActiveTabTracker, HostPorts, LiveScoped, MessageId, PageLifecycleEvent,
        RawHandler, ScopedTransport, Transport, TransportKind,
    };

    use crate::integration::{within, Fixture};

    fn content_scoped(fixture: &Fixture) -> ScopedTransport {
        let ports = HostPorts {
            runtime: fixture.browser.content_runtime(fixture.tab),
            ..HostPorts::default()
        };
        ScopedTransport::new(&ports, ActiveTabTracker::default())
    }

    fn live_scoped(fixture: &Fixture) -> LiveScoped {
        let browser = fixture.browser.clone();
        let tab = fixture.tab;
        LiveScoped::new(content_scoped(fixture), move || {
            let ports = HostPorts {
                runtime: browser.content_runtime(tab),
                ..HostPorts::default()
            };
            Some(ScopedTransport::new(&ports, ActiveTabTracker::default()))
        })
    }

    fn counting_echo(calls: &Arc<AtomicUsize>) -> RawHandler {
        slow_echo(calls, Duration::ZERO)
    }

    fn slow_echo(calls: &Arc<AtomicUsize>, delay: Duration) -> RawHandler {
        let calls = calls.clone();
        raw_handler(move |payload, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(delay).await;
                Ok(payload)
            }
        })
    }

    /// Evict and restore the fixture's page after `delay`, as the lifecycle
    /// listener would.
    async fn churn_after(fixture: &Fixture, live: &LiveScoped, delay: Duration) {
        tokio::time::sleep(delay).await;
        fixture.browser.evict(fixture.tab);
        live.handle(PageLifecycleEvent::Evicting);
        fixture.browser.restore(fixture.tab);
        live.handle(PageLifecycleEvent::Restored);
    }

    #[tokio::test]
    async fn test_reregistering_a_topic_replaces_the_handler() {
        let fixture = Fixture::new();
        let content = content_scoped(&fixture);
        let background = fixture.background.transport(TransportKind::Scoped);

        let first = content
            .reply("who", raw_handler(|_, _| async move { Ok(json!("first")) }))
            .unwrap();
        content
            .reply("who", raw_handler(|_, _| async move { Ok(json!("second")) }))
            .unwrap();
        assert_eq!(content.listener_count("who"), 1);

        let answer = within(background.send("who", Value::Null, None)).await.unwrap();
        assert_eq!(answer, json!("second"));

        // The replaced handle no longer owns the topic.
        first.unsubscribe();
        let answer = within(background.send("who", Value::Null, None)).await.unwrap();
        assert_eq!(answer, json!("second"));
    }

    #[tokio::test]
    async fn test_stop_and_migrate_does_not_duplicate_handlers() {
        let fixture = Fixture::new();
        let background = fixture.background.transport(TransportKind::Scoped);
        let old = content_scoped(&fixture);
        let calls = Arc::new(AtomicUsize::new(0));
        old.reply("count", counting_echo(&calls)).unwrap();

        fixture.browser.evict(fixture.tab);
        old.stop_listeners();
        assert_eq!(old.attached_count(), 0);

        fixture.browser.restore(fixture.tab);
        let fresh = content_scoped(&fixture);
        assert_eq!(old.migrate_listeners(&fresh), 1);
        // A second migration has nothing left to move.
        assert_eq!(old.migrate_listeners(&fresh), 0);

        let answer = within(background.send("count", json!(5), Some(MessageId::from(1))))
            .await
            .unwrap();
        assert_eq!(answer, json!(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fresh.listener_count("count"), 1);
        assert_eq!(old.listener_count("count"), 0);
    }

    #[tokio::test]
    async fn test_live_scoped_serves_across_restores() {
        let fixture = Fixture::new();
        let background = fixture.background.transport(TransportKind::Scoped);
        let tab = fixture.tab;
        let live = live_scoped(&fixture);

        let calls = Arc::new(AtomicUsize::new(0));
        live.reply("count", counting_echo(&calls)).unwrap();

        for round in 0..3 {
            fixture.browser.evict(tab);
            live.handle(PageLifecycleEvent::Evicting);
            fixture.browser.restore(tab);
            live.handle(PageLifecycleEvent::Restored);

            let answer = within(background.send("count", json!(round), None))
                .await
                .unwrap();
            assert_eq!(answer, json!(round));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(live.current().attached_count(), 1);
    }

    // =========================================================================
    // Requests in flight while the page churns
    // =========================================================================

    #[tokio::test]
    async fn test_request_in_flight_to_content_survives_churn() {
        let fixture = Fixture::new();
        let background = fixture.background.transport(TransportKind::Scoped);
        let live = live_scoped(&fixture);
        let calls = Arc::new(AtomicUsize::new(0));
        live.reply("slow", slow_echo(&calls, Duration::from_millis(50)))
            .unwrap();

        let (answer, ()) = tokio::join!(
            within(background.send("slow", json!("late"), Some(MessageId::from(1)))),
            churn_after(&fixture, &live, Duration::from_millis(10)),
        );
        assert_eq!(answer.unwrap(), json!("late"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(live.current().listener_count("slow"), 1);
    }

    #[tokio::test]
    async fn test_content_send_pending_across_churn_resolves_once() {
        let fixture = Fixture::new();
        let background = fixture.background.transport(TransportKind::Scoped);
        let live = live_scoped(&fixture);
        let calls = Arc::new(AtomicUsize::new(0));
        background
            .reply("slow", slow_echo(&calls, Duration::from_millis(50)))
            .unwrap();

        let (answer, ()) = tokio::join!(
            within(live.send("slow", json!("late"), Some(MessageId::from(1)))),
            churn_after(&fixture, &live, Duration::from_millis(10)),
        );
        assert_eq!(answer.unwrap(), json!("late"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The migrated correlation removed itself from the fresh instance.
        assert_eq!(live.current().listener_count("slow"), 0);
    }
}
