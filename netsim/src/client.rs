//! JSON-RPC 2.0 client for cellular callbox/network simulators (C10):
//! request/response correlation by id, notification fan-out, and a
//! self-healing connection that reconnects with exponential backoff on
//! transport loss.
//!
//! Grounded in `cardlink/netsim/connection.py::NetsimConnection` from
//! `original_source`. A single background task (the "driver") owns the
//! [`Transport`] exclusively; callers only ever touch channels, so the
//! pending-request map's lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use url::Url;
use uuid::Uuid;

use crate::error::{classify, Error};
use crate::message::{Inbound, Request};
use crate::reconnect::{Backoff, BackoffConfig};
use crate::transport::Transport;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Notification callback: `(method, params)`.
pub type NotificationHandler = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Reconnect lifecycle callback, invoked with a human-readable phase name
/// and any associated detail, mirroring the `reconnect_start` /
/// `reconnect_attempt` / `reconnect_success` / `reconnect_failure` events
/// of spec.md section 4.10. Kept as a plain callback rather than a
/// dependency on `gp-ota-core`'s `EventBus` so this crate stays usable
/// standalone.
#[derive(Clone, Debug)]
pub enum ReconnectEvent {
    Start,
    Attempt { attempt: u32, delay: Duration },
    Success,
    Failure { error: String },
}

pub type ReconnectHandler = Box<dyn Fn(&ReconnectEvent) + Send + Sync>;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, Error>>>>>;

struct Subscribers {
    notifications: Mutex<Vec<NotificationHandler>>,
    reconnect: Mutex<Vec<ReconnectHandler>>,
}

impl Subscribers {
    fn new() -> Self {
        Self { notifications: Mutex::new(Vec::new()), reconnect: Mutex::new(Vec::new()) }
    }

    fn notify(&self, method: &str, params: &Value) {
        let handlers = self.notifications.lock().expect("notification subscribers lock poisoned");
        for h in handlers.iter() {
            h(method, params);
        }
    }

    fn emit_reconnect(&self, event: ReconnectEvent) {
        let handlers = self.reconnect.lock().expect("reconnect subscribers lock poisoned");
        for h in handlers.iter() {
            h(&event);
        }
    }
}

/// Handle to a connected (or reconnecting) netsim adapter. Cheap to clone;
/// every clone shares the same background driver.
#[derive(Clone)]
pub struct NetsimClient {
    write_tx: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    subscribers: Arc<Subscribers>,
    connected: Arc<std::sync::atomic::AtomicBool>,
}

impl NetsimClient {
    /// Connects to `url` and starts the background driver. The initial
    /// connection attempt is not retried -- callers that want resilience
    /// against a target that is not yet listening should retry `connect`
    /// itself; once connected, subsequent transport loss is handled
    /// automatically by the reconnect manager using `backoff`.
    pub async fn connect(url: Url, backoff: BackoffConfig) -> Result<Self, Error> {
        let transport = timeout(DEFAULT_CONNECT_TIMEOUT, Transport::connect(&url))
            .await
            .map_err(|_| Error::Timeout(DEFAULT_CONNECT_TIMEOUT))??;

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let subscribers = Arc::new(Subscribers::new());
        let connected = Arc::new(std::sync::atomic::AtomicBool::new(true));

        tokio::spawn(drive(url, transport, write_rx, pending.clone(), subscribers.clone(), connected.clone(), Backoff::new(backoff)));

        Ok(Self { write_tx, pending, subscribers, connected })
    }

    pub fn on_notification(&self, handler: impl Fn(&str, &Value) + Send + Sync + 'static) {
        self.subscribers.notifications.lock().expect("notification subscribers lock poisoned").push(Box::new(handler));
    }

    pub fn on_reconnect_event(&self, handler: impl Fn(&ReconnectEvent) + Send + Sync + 'static) {
        self.subscribers.reconnect.lock().expect("reconnect subscribers lock poisoned").push(Box::new(handler));
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Sends a request and awaits its correlated response, failing with
    /// [`Error::Timeout`] after `DEFAULT_REQUEST_TIMEOUT`.
    pub async fn call(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value, Error> {
        self.call_with_timeout(method, params, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn call_with_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending map lock poisoned");
            pending.insert(id.clone(), tx);
        }

        let req = Request::new(id.clone(), method, params);
        let frame = serde_json::to_string(&req)?;
        if self.write_tx.send(frame).is_err() {
            self.pending.lock().expect("pending map lock poisoned").remove(&id);
            return Err(Error::NotConnected);
        }

        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                self.pending.lock().expect("pending map lock poisoned").remove(&id);
                Err(Error::Timeout(deadline))
            }
        }
    }
}

/// Owns the transport exclusively. Reads frames and dispatches them;
/// forwards write requests from `write_rx`; on transport loss, fails every
/// pending request and loops into the reconnect backoff.
async fn drive(
    url: Url,
    mut transport: Transport,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    pending: PendingMap,
    subscribers: Arc<Subscribers>,
    connected: Arc<std::sync::atomic::AtomicBool>,
    mut backoff: Backoff,
) {
    loop {
        loop {
            tokio::select! {
                frame = write_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = transport.send(frame).await {
                                log::warn!("netsim send failed: {e}");
                                break;
                            }
                        }
                        None => return, // client dropped, nothing left to drive
                    }
                }
                inbound = transport.recv() => {
                    match inbound {
                        Some(Ok(raw)) => dispatch(&raw, &pending, &subscribers),
                        Some(Err(e)) => {
                            log::warn!("netsim recv error: {e}");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        connected.store(false, std::sync::atomic::Ordering::SeqCst);
        fail_all_pending(&pending);
        subscribers.emit_reconnect(ReconnectEvent::Start);

        loop {
            if backoff.attempts_exhausted() {
                subscribers.emit_reconnect(ReconnectEvent::Failure { error: "reconnect attempts exhausted".into() });
                return;
            }
            let delay = backoff.next();
            subscribers.emit_reconnect(ReconnectEvent::Attempt { attempt: backoff.attempt_count(), delay });
            tokio::time::sleep(delay).await;

            match Transport::connect(&url).await {
                Ok(new_transport) => {
                    transport = new_transport;
                    backoff.reset();
                    connected.store(true, std::sync::atomic::Ordering::SeqCst);
                    subscribers.emit_reconnect(ReconnectEvent::Success);
                    break;
                }
                Err(e) => {
                    subscribers.emit_reconnect(ReconnectEvent::Failure { error: e.to_string() });
                }
            }
        }
    }
}

fn fail_all_pending(pending: &PendingMap) {
    let mut pending = pending.lock().expect("pending map lock poisoned");
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(Error::ConnectionLost));
    }
}

fn dispatch(raw: &str, pending: &PendingMap, subscribers: &Subscribers) {
    let inbound: Inbound = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("malformed netsim message: {e}");
            return;
        }
    };

    if inbound.is_notification() {
        let method = inbound.method.as_deref().unwrap_or_default();
        subscribers.notify(method, &inbound.params);
        return;
    }

    let id = match &inbound.id {
        Some(id) => id.clone(),
        None => return,
    };

    let tx = {
        let mut pending = pending.lock().expect("pending map lock poisoned");
        pending.remove(&id)
    };

    let Some(tx) = tx else {
        log::debug!("response for unknown or already-resolved id {id}");
        return;
    };

    let result = if let Some(err) = inbound.error {
        Err(classify(err.code, err.message, &err.data))
    } else {
        Ok(inbound.result.unwrap_or(Value::Null))
    };

    let _ = tx.send(result);
}
