//! The Admin Server proper: ties the PSK-TLS transport (C6), the Admin
//! HTTP state machine (C7), and the Session Registry (C9) together.
//!
//! One [`AdminServer::accept_loop`] task owns the listening socket; each
//! accepted connection gets its own task running [`AdminServer::serve_connection`],
//! which drives exactly the state table of spec.md section 4.7 for the
//! lifetime of that connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gp_ota_core::{CommandQueue, Event, EventBus, EventKind, SessionState};
use openssl::ssl::SslContext;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_openssl::SslStream;
use uuid::Uuid;

use crate::config::AdminServerConfig;
use crate::error::Error;
use crate::http::{self, ADMIN_CONTENT_TYPE};
use crate::psk::{self, PskKeyStore};
use crate::registry::SessionRegistry;

/// The running Admin Server: owns the TLS context, the Session Registry,
/// and the Event Bus every subscriber (dashboard, Script Engine glue,
/// metrics) observes without coupling to this struct's internals.
pub struct AdminServer {
    config: AdminServerConfig,
    tls_ctx: SslContext,
    pub registry: SessionRegistry,
    pub events: EventBus,
}

impl AdminServer {
    pub fn new(config: AdminServerConfig, psk_store: Arc<dyn PskKeyStore>) -> Result<Self, Error> {
        let tls_ctx = psk::server_context(psk_store, &config.allowed_ciphers)?;
        let events = EventBus::new(config.event_history_capacity);
        let registry = SessionRegistry::new(events.clone());
        Ok(Self { config, tls_ctx, registry, events })
    }

    /// Enqueues `commands` onto a session's pending queue in order (this is
    /// the one-way push the Script Engine's execute path and
    /// dashboard-injected APDUs use; see spec.md section 4.4/4.7). Safe to
    /// call from any context -- it only touches the registry's lock.
    pub async fn queue_commands(&self, session_id: Uuid, commands: Vec<Vec<u8>>) -> Result<(), Error> {
        self.registry
            .update(session_id, |s| {
                for cmd in commands {
                    s.enqueue(cmd);
                }
            })
            .await?;
        Ok(())
    }

    /// Accepts connections until `shutdown` fires, then stops accepting and
    /// waits up to `shutdown_grace` for in-flight sessions to close on
    /// their own before returning (spec.md section 5 cancellation).
    pub async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        let mut tasks = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let Ok((stream, peer_addr)) = accepted else { continue };
                    let server = self.clone();
                    tasks.spawn(async move {
                        server.serve_connection(stream, peer_addr).await;
                    });
                }
            }
        }

        let grace = self.config.shutdown_grace;
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        let _ = tokio::time::timeout(grace, drain).await;
        tasks.abort_all();
    }

    async fn serve_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let (tls_stream, tls_info) = match psk::accept(&self.tls_ctx, stream, self.config.handshake_timeout).await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("PSK-TLS handshake with {peer_addr} failed: {e}");
                return;
            }
        };

        let psk_identity = psk::psk_identity(&tls_stream);
        if let Err(e) = self.drive_session(tls_stream, tls_info, peer_addr, psk_identity).await {
            log::warn!("admin session with {peer_addr} ended with error: {e}");
        }
    }

    /// Drives the state table of spec.md section 4.7 over one already
    /// PSK-TLS-established connection until a 204 (DONE), a fatal error, or
    /// the peer closes the stream.
    async fn drive_session<S>(
        &self,
        mut stream: SslStream<S>,
        tls_info: gp_ota_core::TlsConnectionInfo,
        peer_addr: SocketAddr,
        psk_identity: Option<String>,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let client_address = peer_addr.to_string();
        let session = self.registry.create_or_reconnect(psk_identity.clone(), Some(client_address.clone())).await;
        let session_id = session.id;

        self.registry
            .update(session_id, |s| {
                let now = chrono::Utc::now();
                s.transition(SessionState::Connecting, now);
                s.transition(SessionState::Handshaking, now);
                s.transition(SessionState::Active, now);
                s.tls_info = Some(tls_info.clone());
            })
            .await?;

        self.events.emit(
            Event::new("admin_server", EventKind::HandshakeCompleted, serde_json::json!({ "client_address": client_address, "cipher_suite": tls_info.cipher_suite }))
                .with_session(session_id.to_string()),
        );

        let mut first_request = true;

        loop {
            let request = http::read_request(&mut stream, self.config.max_body_bytes).await?;

            if request.path != self.config.admin_path {
                http::write_response(&mut stream, 404, None, b"").await?;
                break;
            }

            if first_request {
                first_request = false;
                if let Some(admin_from) = request.header("X-Admin-From") {
                    let parsed = gp_ota_core::parse_admin_from(admin_from);
                    self.registry.update(session_id, |s| s.admin_from = parsed).await?;
                    self.events.emit(
                        Event::new("admin_server", EventKind::SessionUpdated, serde_json::json!({ "admin_from": admin_from }))
                            .with_session(session_id.to_string()),
                    );
                }
            } else if !request.body.is_empty() {
                self.record_response_apdu(session_id, &request.body).await?;
            }

            let next_command = self.registry.update_with(session_id, |s| s.dequeue()).await?;

            match next_command {
                Some(command_bytes) => {
                    self.registry
                        .update(session_id, |s| {
                            s.transition(SessionState::Exchanging, chrono::Utc::now());
                        })
                        .await?;
                    self.record_sent_apdu(session_id, &command_bytes).await?;
                    http::write_response(&mut stream, 200, Some(ADMIN_CONTENT_TYPE), &command_bytes).await?;
                    self.registry
                        .update(session_id, |s| {
                            s.transition(SessionState::Active, chrono::Utc::now());
                        })
                        .await?;
                }
                None => {
                    http::write_response(&mut stream, 204, None, b"").await?;
                    self.registry
                        .update(session_id, |s| {
                            s.transition(SessionState::Closing, chrono::Utc::now());
                        })
                        .await?;
                    self.events.emit(
                        Event::new("admin_server", EventKind::SessionClosed, serde_json::json!({ "reason": "complete" }))
                            .with_session(session_id.to_string()),
                    );
                    break;
                }
            }
        }

        Ok(())
    }

    async fn record_sent_apdu(&self, session_id: Uuid, bytes: &[u8]) -> Result<(), Error> {
        let hex = hex::encode_upper(bytes);
        self.registry
            .update(session_id, |s| {
                s.log_apdu(gp_ota_core::ApduDirection::ToCard, hex.clone(), None, chrono::Utc::now())
            })
            .await?;
        self.events.emit(
            Event::new("admin_server", EventKind::ApduSent, serde_json::json!({ "hex": hex })).with_session(session_id.to_string()),
        );
        Ok(())
    }

    async fn record_response_apdu(&self, session_id: Uuid, bytes: &[u8]) -> Result<(), Error> {
        let hex = hex::encode_upper(bytes);
        let sw = gp_ota_apdu::ResponseApdu::decode(bytes).ok().map(|r| r.sw.0);
        self.registry
            .update(session_id, |s| s.log_apdu(gp_ota_core::ApduDirection::FromCard, hex.clone(), sw, chrono::Utc::now()))
            .await?;
        self.events.emit(
            Event::new("admin_server", EventKind::ApduReceived, serde_json::json!({ "hex": hex, "sw": sw }))
                .with_session(session_id.to_string()),
        );
        Ok(())
    }
}

/// Binds the Script Engine's execute path (spec.md section 4.4) to this
/// server's own session queue, so `ScriptStore::execute` never needs to
/// know about sessions, registries, or events -- it just enqueues bytes.
#[async_trait]
impl CommandQueue for AdminServer {
    async fn enqueue(&self, session_id: Uuid, commands: Vec<Vec<u8>>) -> Result<(), gp_ota_core::script::Error> {
        self.queue_commands(session_id, commands)
            .await
            .map_err(|e| gp_ota_core::script::Error::Repository(e.to_string()))
    }
}

pub async fn default_listener(bind_address: &str) -> Result<TcpListener, Error> {
    Ok(TcpListener::bind(bind_address).await?)
}

/// Idle timeout default used by the reaper when no override is supplied.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
