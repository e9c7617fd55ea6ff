//! E6 -- Session reaper: a session idle past its configured timeout is
//! removed within `timeout * 1.1 + 5s`, and a `session_deleted` event with
//! `reason=timeout` lands in the Event Bus history.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gp_ota_core::EventBus;
    use gp_ota_server::SessionRegistry;

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_reaped_and_logged_within_deadline() {
        let events = EventBus::new(100);
        let registry = SessionRegistry::new(events.clone());
        let session = registry.create_or_reconnect(Some("test_card_001".into()), Some("127.0.0.1:9".into())).await;

        let timeout = Duration::from_secs(10);
        let _reaper = registry.spawn_reaper(timeout);

        tokio::time::advance(Duration::from_secs(16)).await;
        // Let the reaper's own scan tick actually run after the clock jump.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert!(registry.get(session.id).await.is_err(), "session should have been reaped by the deadline");

        let deleted = events.history(None).into_iter().any(|e| e.data["reason"] == "timeout");
        assert!(deleted, "expected a session_deleted(reason=timeout) event in history");
    }
}
