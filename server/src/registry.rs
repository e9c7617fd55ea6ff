//! Session Registry (C9): the single owner of live [`Session`] state,
//! keyed by both session id and `(psk_identity, client_address)`, plus the
//! background reaper that times sessions out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gp_ota_core::{Event, EventBus, EventKind, Session, SessionState};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Error;

struct Inner {
    by_id: HashMap<Uuid, Session>,
    by_psk_and_addr: HashMap<(String, String), Uuid>,
}

/// Owns every live administrative [`Session`]. All mutating operations take
/// an exclusive lock; reads of a single session clone it (sessions are
/// small and short-lived relative to clone cost, matching the "read-only
/// snapshot" ownership rule of spec.md section 3).
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<Inner>>,
    events: EventBus,
}

impl SessionRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner { by_id: HashMap::new(), by_psk_and_addr: HashMap::new() })),
            events,
        }
    }

    /// Creates a new session, or -- if `psk_identity` + `client_address`
    /// match an existing live session -- reuses it and emits
    /// `session_reconnected` instead of creating a duplicate.
    pub async fn create_or_reconnect(&self, psk_identity: Option<String>, client_address: Option<String>) -> Session {
        let mut inner = self.inner.write().await;

        if let (Some(psk), Some(addr)) = (&psk_identity, &client_address) {
            if let Some(id) = inner.by_psk_and_addr.get(&(psk.clone(), addr.clone())) {
                if let Some(existing) = inner.by_id.get_mut(id) {
                    if !existing.state.is_terminal() {
                        existing.updated_at = Utc::now();
                        let snapshot = existing.clone();
                        drop(inner);
                        self.events.emit(
                            Event::new("session_registry", EventKind::Other("session_reconnected".into()), serde_json::json!({ "session_id": snapshot.id.to_string() }))
                                .with_session(snapshot.id.to_string()),
                        );
                        return snapshot;
                    }
                }
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut session = Session::new(id, now);
        session.psk_identity = psk_identity.clone();
        session.client_address = client_address.clone();

        if let (Some(psk), Some(addr)) = (psk_identity, client_address) {
            inner.by_psk_and_addr.insert((psk, addr), id);
        }
        inner.by_id.insert(id, session.clone());
        session
    }

    pub async fn get(&self, id: Uuid) -> Result<Session, Error> {
        let inner = self.inner.read().await;
        inner.by_id.get(&id).cloned().ok_or(Error::SessionNotFound(id))
    }

    pub async fn get_by_psk_identity(&self, psk_identity: &str) -> Option<Session> {
        let inner = self.inner.read().await;
        inner.by_id.values().find(|s| s.psk_identity.as_deref() == Some(psk_identity)).cloned()
    }

    pub async fn list(&self) -> Vec<Session> {
        self.inner.read().await.by_id.values().cloned().collect()
    }

    /// Applies `update` to the stored session under the write lock and
    /// returns the resulting snapshot.
    pub async fn update<F>(&self, id: Uuid, update: F) -> Result<Session, Error>
    where
        F: FnOnce(&mut Session),
    {
        let mut inner = self.inner.write().await;
        let session = inner.by_id.get_mut(&id).ok_or(Error::SessionNotFound(id))?;
        update(session);
        Ok(session.clone())
    }

    /// Like [`Self::update`], but returns whatever `update` itself
    /// produces rather than the session snapshot -- used when the mutation
    /// also needs to hand something back, e.g. dequeuing a pending
    /// command.
    pub async fn update_with<F, T>(&self, id: Uuid, update: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Session) -> T,
    {
        let mut inner = self.inner.write().await;
        let session = inner.by_id.get_mut(&id).ok_or(Error::SessionNotFound(id))?;
        Ok(update(session))
    }

    pub async fn delete(&self, id: Uuid) -> Option<Session> {
        let mut inner = self.inner.write().await;
        let session = inner.by_id.remove(&id)?;
        if let (Some(psk), Some(addr)) = (&session.psk_identity, &session.client_address) {
            inner.by_psk_and_addr.remove(&(psk.clone(), addr.clone()));
        }
        Some(session)
    }

    /// Spawns the periodic reaper task. Scan period is `max(idle_timeout /
    /// 10, 5s)` per spec.md section 4.9; returns the task handle so the
    /// caller can abort it during shutdown.
    pub fn spawn_reaper(&self, idle_timeout: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let scan_period = std::cmp::max(idle_timeout / 10, Duration::from_secs(5));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scan_period);
            loop {
                interval.tick().await;
                registry.reap_once(idle_timeout).await;
            }
        })
    }

    async fn reap_once(&self, idle_timeout: Duration) {
        let now = Utc::now();
        let expired: Vec<Uuid> = {
            let inner = self.inner.read().await;
            inner
                .by_id
                .values()
                .filter(|s| !s.state.is_terminal())
                .filter(|s| now.signed_duration_since(s.updated_at).to_std().unwrap_or_default() > idle_timeout)
                .map(|s| s.id)
                .collect()
        };

        for id in expired {
            let mut inner = self.inner.write().await;
            if let Some(session) = inner.by_id.get_mut(&id) {
                session.transition(SessionState::Timeout, now);
            }
            if let Some(session) = inner.by_id.remove(&id) {
                if let (Some(psk), Some(addr)) = (&session.psk_identity, &session.client_address) {
                    inner.by_psk_and_addr.remove(&(psk.clone(), addr.clone()));
                }
            }
            drop(inner);

            self.events.emit(
                Event::new("session_registry", EventKind::Other("session_deleted".into()), serde_json::json!({ "reason": "timeout" }))
                    .with_session(id.to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reconnect_reuses_existing_session() {
        let registry = SessionRegistry::new(EventBus::new(100));
        let first = registry.create_or_reconnect(Some("psk1".into()), Some("1.2.3.4:1".into())).await;
        let second = registry.create_or_reconnect(Some("psk1".into()), Some("1.2.3.4:1".into())).await;
        assert_eq!(first.id, second.id);
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn distinct_addresses_create_distinct_sessions() {
        let registry = SessionRegistry::new(EventBus::new(100));
        let first = registry.create_or_reconnect(Some("psk1".into()), Some("1.2.3.4:1".into())).await;
        let second = registry.create_or_reconnect(Some("psk1".into()), Some("1.2.3.4:2".into())).await;
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn reaper_times_out_idle_sessions() {
        let events = EventBus::new(100);
        let registry = SessionRegistry::new(events.clone());
        let session = registry.create_or_reconnect(None, None).await;
        registry
            .update(session.id, |s| {
                s.updated_at = Utc::now() - chrono::Duration::seconds(100);
            })
            .await
            .unwrap();

        registry.reap_once(Duration::from_secs(10)).await;

        assert!(registry.get(session.id).await.is_err());
        let deleted = events.history(None).into_iter().any(|e| e.data["reason"] == "timeout");
        assert!(deleted);
    }
}
