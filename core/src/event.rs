//! In-process Event Bus (C11): bounded history, synchronous and async
//! subscribers, and correlation sessions for grouping events that belong to
//! one logical exchange (e.g. all APDUs of a netsim-triggered scenario).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

const DEFAULT_MAX_HISTORY: usize = 10_000;

/// The kind of an event. Known kinds get a named variant; anything emitted
/// by a component that predates this list still round-trips via `Other`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EventKind {
    HandshakeCompleted,
    ApduSent,
    ApduReceived,
    SessionUpdated,
    SessionTimeout,
    SessionClosed,
    ScriptExecuted,
    NetsimConnected,
    NetsimDisconnected,
    Error,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::HandshakeCompleted => "handshake_completed",
            Self::ApduSent => "apdu_sent",
            Self::ApduReceived => "apdu_received",
            Self::SessionUpdated => "session_updated",
            Self::SessionTimeout => "session_timeout",
            Self::SessionClosed => "session_closed",
            Self::ScriptExecuted => "script_executed",
            Self::NetsimConnected => "netsim_connected",
            Self::NetsimDisconnected => "netsim_disconnected",
            Self::Error => "error",
            Self::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "handshake_completed" => Self::HandshakeCompleted,
            "apdu_sent" => Self::ApduSent,
            "apdu_received" => Self::ApduReceived,
            "session_updated" => Self::SessionUpdated,
            "session_timeout" => Self::SessionTimeout,
            "session_closed" => Self::SessionClosed,
            "script_executed" => Self::ScriptExecuted,
            "netsim_connected" => Self::NetsimConnected,
            "netsim_disconnected" => Self::NetsimDisconnected,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A single event, as broadcast by any component to the bus.
#[derive(Clone, Debug)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: EventKind,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub data: serde_json::Value,
    pub imsi: Option<String>,
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    pub fn new(source: impl Into<String>, event_type: EventKind, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            source: source.into(),
            data,
            imsi: None,
            session_id: None,
            correlation_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

type SyncSubscriber = Box<dyn Fn(&Event) + Send + Sync>;
type AsyncSubscriber = Box<dyn Fn(&Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

enum Subscriber {
    Sync(SyncSubscriber),
    Async(AsyncSubscriber),
}

struct Subscription {
    id: u64,
    filter: Option<EventKind>,
    subscriber: Subscriber,
}

/// An opaque handle returned by `subscribe`, used to unsubscribe later.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SubscriptionHandle(u64);

struct Inner {
    history: VecDeque<Event>,
    max_history: usize,
    subscriptions: Vec<Subscription>,
    correlations: HashMap<String, Vec<Event>>,
}

/// In-process pub/sub bus shared (via `Arc`) across the components that
/// need to observe cross-cutting activity: session transitions, APDU
/// traffic, netsim connectivity, script execution.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl EventBus {
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                history: VecDeque::new(),
                max_history,
                subscriptions: Vec::new(),
                correlations: HashMap::new(),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe a synchronous callback, optionally filtered to a single
    /// event type. Callback panics are caught and logged; they never abort
    /// dispatch to other subscribers.
    pub fn subscribe(
        &self,
        filter: Option<EventKind>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscriptions.push(Subscription { id, filter, subscriber: Subscriber::Sync(Box::new(callback)) });
        SubscriptionHandle(id)
    }

    /// Subscribe an async callback. Dispatch to async subscribers happens
    /// via `tokio::spawn` so a slow subscriber cannot block emission to
    /// its siblings.
    pub fn subscribe_async<F, Fut>(&self, filter: Option<EventKind>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let wrapped: AsyncSubscriber = Box::new(move |e| Box::pin(callback(e)));
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscriptions.push(Subscription { id, filter, subscriber: Subscriber::Async(wrapped) });
        SubscriptionHandle(id)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscriptions.retain(|s| s.id != handle.0);
    }

    /// Record the event in history and dispatch to matching subscribers.
    pub fn emit(&self, event: Event) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");

        if let Some(cid) = &event.correlation_id {
            if let Some(bucket) = inner.correlations.get_mut(cid) {
                bucket.push(event.clone());
            }
        }

        if inner.history.len() >= inner.max_history {
            inner.history.pop_front();
        }
        inner.history.push_back(event.clone());

        for sub in &inner.subscriptions {
            if let Some(f) = &sub.filter {
                if *f != event.event_type {
                    continue;
                }
            }
            match &sub.subscriber {
                Subscriber::Sync(f) => {
                    // callbacks run inline; a panicking subscriber must not
                    // take down event delivery to its siblings.
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&event)));
                    if let Err(e) = result {
                        log::error!("event subscriber panicked: {e:?}");
                    }
                }
                Subscriber::Async(f) => {
                    let fut = f(&event);
                    tokio::spawn(fut);
                }
            }
        }
    }

    /// Return a copy of the current history, optionally filtered by kind.
    pub fn history(&self, filter: Option<&EventKind>) -> Vec<Event> {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        match filter {
            Some(k) => inner.history.iter().filter(|e| &e.event_type == k).cloned().collect(),
            None => inner.history.iter().cloned().collect(),
        }
    }

    /// Filtering query over the bounded history (spec.md section 4.11):
    /// every predicate that is `Some` must match, and results are returned
    /// in insertion order, truncated to `limit`.
    #[allow(clippy::too_many_arguments)]
    pub fn find_events(
        &self,
        imsi: Option<&str>,
        session_id: Option<&str>,
        event_types: Option<&[EventKind]>,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        data_filter: Option<&dyn Fn(&serde_json::Value) -> bool>,
        limit: Option<usize>,
    ) -> Vec<Event> {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        let mut out = Vec::new();

        for event in inner.history.iter() {
            if let Some(imsi) = imsi {
                if event.imsi.as_deref() != Some(imsi) {
                    continue;
                }
            }
            if let Some(session_id) = session_id {
                if event.session_id.as_deref() != Some(session_id) {
                    continue;
                }
            }
            if let Some(types) = event_types {
                if !types.contains(&event.event_type) {
                    continue;
                }
            }
            if let Some(since) = since {
                if event.timestamp < since {
                    continue;
                }
            }
            if let Some(until) = until {
                if event.timestamp > until {
                    continue;
                }
            }
            if let Some(predicate) = data_filter {
                if !predicate(&event.data) {
                    continue;
                }
            }

            out.push(event.clone());
            if let Some(limit) = limit {
                if out.len() >= limit {
                    break;
                }
            }
        }

        out
    }

    /// Begin collecting events tagged with `correlation_id` into a bucket.
    pub fn start_correlation(&self, correlation_id: impl Into<String>) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.correlations.insert(correlation_id.into(), Vec::new());
    }

    /// Stop collecting and return everything gathered for `correlation_id`.
    pub fn end_correlation(&self, correlation_id: &str) -> Vec<Event> {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.correlations.remove(correlation_id).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn history_is_bounded() {
        let bus = EventBus::new(3);
        for i in 0..5 {
            bus.emit(Event::new("test", EventKind::ApduSent, serde_json::json!({ "i": i })));
        }
        let hist = bus.history(None);
        assert_eq!(hist.len(), 3);
        assert_eq!(hist[0].data["i"], 2);
        assert_eq!(hist[2].data["i"], 4);
    }

    #[test]
    fn filtered_subscriber_only_sees_matching_events() {
        let bus = EventBus::new(10);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(Some(EventKind::ApduSent), move |_e| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::new("test", EventKind::ApduSent, serde_json::Value::Null));
        bus.emit(Event::new("test", EventKind::ApduReceived, serde_json::Value::Null));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(10);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let handle = bus.subscribe(None, move |_e| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Event::new("test", EventKind::Error, serde_json::Value::Null));
        bus.unsubscribe(handle);
        bus.emit(Event::new("test", EventKind::Error, serde_json::Value::Null));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn correlation_session_collects_only_tagged_events() {
        let bus = EventBus::new(10);
        bus.start_correlation("corr-1");
        bus.emit(Event::new("test", EventKind::ApduSent, serde_json::Value::Null).with_correlation("corr-1"));
        bus.emit(Event::new("test", EventKind::ApduReceived, serde_json::Value::Null));
        let collected = bus.end_correlation("corr-1");
        assert_eq!(collected.len(), 1);
    }

    #[test]
    fn find_events_combines_predicates_in_insertion_order_and_respects_limit() {
        let bus = EventBus::new(10);

        bus.emit(Event::new("test", EventKind::ApduSent, serde_json::json!({ "n": 1 })).with_session("sess-a"));
        bus.emit(Event::new("test", EventKind::ApduReceived, serde_json::json!({ "n": 2 })).with_session("sess-a"));
        bus.emit(Event::new("test", EventKind::ApduSent, serde_json::json!({ "n": 3 })).with_session("sess-b"));
        bus.emit(Event::new("test", EventKind::ApduSent, serde_json::json!({ "n": 4 })).with_session("sess-a"));

        let matches = bus.find_events(None, Some("sess-a"), Some(&[EventKind::ApduSent]), None, None, None, None);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].data["n"], 1);
        assert_eq!(matches[1].data["n"], 4);

        let limited = bus.find_events(None, Some("sess-a"), Some(&[EventKind::ApduSent]), None, None, None, Some(1));
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].data["n"], 1);
    }

    #[test]
    fn find_events_filters_by_time_range_and_data_predicate() {
        let bus = EventBus::new(10);
        let t0 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let t1 = DateTime::parse_from_rfc3339("2026-01-01T00:01:00Z").unwrap().with_timezone(&Utc);
        let t2 = DateTime::parse_from_rfc3339("2026-01-01T00:02:00Z").unwrap().with_timezone(&Utc);

        let mut early = Event::new("test", EventKind::Error, serde_json::json!({ "code": 1 }));
        early.timestamp = t0;
        let mut mid = Event::new("test", EventKind::Error, serde_json::json!({ "code": 2 }));
        mid.timestamp = t1;
        let mut late = Event::new("test", EventKind::Error, serde_json::json!({ "code": 3 }));
        late.timestamp = t2;

        bus.emit(early);
        bus.emit(mid);
        bus.emit(late);

        let in_range = bus.find_events(None, None, None, Some(t1), Some(t1), None, None);
        assert_eq!(in_range.len(), 1);
        assert_eq!(in_range[0].data["code"], 2);

        let predicate: &dyn Fn(&serde_json::Value) -> bool = &|data| data["code"] == 3;
        let by_data = bus.find_events(None, None, None, None, None, Some(predicate), None);
        assert_eq!(by_data.len(), 1);
        assert_eq!(by_data[0].data["code"], 3);
    }

    #[test]
    fn event_kind_round_trips_through_str() {
        for kind in [
            EventKind::HandshakeCompleted,
            EventKind::ApduSent,
            EventKind::ApduReceived,
            EventKind::SessionUpdated,
            EventKind::SessionTimeout,
            EventKind::SessionClosed,
            EventKind::ScriptExecuted,
            EventKind::NetsimConnected,
            EventKind::NetsimDisconnected,
            EventKind::Error,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), kind);
        }
        assert_eq!(EventKind::parse("something_custom"), EventKind::Other("something_custom".into()));
    }
}
