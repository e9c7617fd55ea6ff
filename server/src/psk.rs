//! PSK-TLS transport (C6): RFC 4279 pre-shared-key TLS 1.2 in both client
//! and server roles, via OpenSSL's PSK callback hooks wrapped for async I/O
//! by `tokio-openssl`. `rustls` has no PSK cipher suite support, so this is
//! the one mainstream binding that can speak the profile at all -- it is a
//! pure enrichment pulled in to satisfy spec.md section 4.6, not a
//! replacement for any teacher dependency.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gp_ota_core::TlsConnectionInfo;
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_openssl::SslStream;

use crate::config::CipherSuite;
use crate::error::Error;

/// Capability the Admin Server consumes to resolve a presented PSK
/// identity to its key (spec.md section 6: `lookup(identity) -> key |
/// NotFound`).
pub trait PskKeyStore: Send + Sync {
    fn lookup(&self, identity: &[u8]) -> Option<Vec<u8>>;
}

/// An in-memory key store, primarily for tests and the CLI's
/// `--psk-identity`/`--psk-key` pair.
#[derive(Default)]
pub struct InMemoryPskStore {
    keys: std::collections::BTreeMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryPskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> &mut Self {
        self.keys.insert(identity.into(), key.into());
        self
    }
}

impl PskKeyStore for InMemoryPskStore {
    fn lookup(&self, identity: &[u8]) -> Option<Vec<u8>> {
        self.keys.get(identity).cloned()
    }
}

fn cipher_list(suites: &[CipherSuite]) -> String {
    suites.iter().map(CipherSuite::openssl_name).collect::<Vec<_>>().join(":")
}

/// Builds a server-role `SslContextBuilder` that authenticates inbound
/// connections purely via PSK (no certificates) and rejects identities
/// `store` doesn't recognize.
pub fn server_context(store: Arc<dyn PskKeyStore>, allowed_ciphers: &[CipherSuite]) -> Result<SslContext, Error> {
    let mut ctx = SslContextBuilder::new(SslMethod::tls_server())?;
    ctx.set_cipher_list(&cipher_list(allowed_ciphers))?;
    ctx.set_verify(SslVerifyMode::NONE);

    ctx.set_psk_server_callback(move |_ssl, identity, psk_out| {
        let identity = identity.unwrap_or(&[]);
        match store.lookup(identity) {
            Some(key) if key.len() <= psk_out.len() => {
                psk_out[..key.len()].copy_from_slice(&key);
                Ok(key.len())
            }
            _ => Ok(0),
        }
    });

    Ok(ctx.build())
}

/// Builds a client-role `SslContext` presenting `identity`/`key`.
pub fn client_context(identity: Vec<u8>, key: Vec<u8>, allowed_ciphers: &[CipherSuite]) -> Result<SslContext, Error> {
    let mut ctx = SslContextBuilder::new(SslMethod::tls_client())?;
    ctx.set_cipher_list(&cipher_list(allowed_ciphers))?;
    ctx.set_verify(SslVerifyMode::NONE);

    ctx.set_psk_client_callback(move |_ssl, _hint, identity_out, psk_out| {
        if identity.len() >= identity_out.len() || key.len() > psk_out.len() {
            return Ok(0);
        }
        identity_out[..identity.len()].copy_from_slice(&identity);
        identity_out[identity.len()] = 0;
        psk_out[..key.len()].copy_from_slice(&key);
        Ok(key.len())
    });

    Ok(ctx.build())
}

/// Accepts a PSK-TLS server-role handshake over `stream`, enforcing
/// `handshake_timeout`. Returns the established stream plus the negotiated
/// connection info.
pub async fn accept<S>(
    ctx: &SslContext,
    stream: S,
    handshake_timeout: Duration,
) -> Result<(SslStream<S>, TlsConnectionInfo), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ssl = Ssl::new(ctx)?;
    let mut tls_stream = SslStream::new(ssl, stream).map_err(|e| Error::TlsHandshake(e.to_string()))?;

    let start = Instant::now();
    tokio::time::timeout(handshake_timeout, std::pin::Pin::new(&mut tls_stream).accept())
        .await
        .map_err(|_| Error::HandshakeTimeout(handshake_timeout))?
        .map_err(|e| Error::TlsHandshake(e.to_string()))?;

    let info = connection_info(&tls_stream, start.elapsed());
    Ok((tls_stream, info))
}

/// Connects with a PSK-TLS client-role handshake over `stream`.
pub async fn connect<S>(
    ctx: &SslContext,
    stream: S,
    handshake_timeout: Duration,
) -> Result<(SslStream<S>, TlsConnectionInfo), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ssl = Ssl::new(ctx)?;
    let mut tls_stream = SslStream::new(ssl, stream).map_err(|e| Error::TlsHandshake(e.to_string()))?;

    let start = Instant::now();
    tokio::time::timeout(handshake_timeout, std::pin::Pin::new(&mut tls_stream).connect())
        .await
        .map_err(|_| Error::HandshakeTimeout(handshake_timeout))?
        .map_err(|e| Error::TlsHandshake(e.to_string()))?;

    let info = connection_info(&tls_stream, start.elapsed());
    Ok((tls_stream, info))
}

fn connection_info<S>(stream: &SslStream<S>, handshake_duration: Duration) -> TlsConnectionInfo {
    let ssl = stream.ssl();
    TlsConnectionInfo {
        cipher_suite: ssl.current_cipher().map(|c| c.name().to_string()).unwrap_or_default(),
        protocol_version: ssl.version_str().to_string(),
        handshake_duration_ms: handshake_duration.as_millis() as u64,
    }
}

/// Best-effort extraction of the PSK identity the peer presented during a
/// server-role handshake, used to key the [`crate::registry::SessionRegistry`]
/// lookup.
pub fn psk_identity<S>(stream: &SslStream<S>) -> Option<String> {
    stream.ssl().psk_identity().map(|b| String::from_utf8_lossy(b).into_owned())
}
