/// Errors produced by the Admin Server: PSK-TLS setup/handshake, the Admin
/// HTTP wire format, and the Session Registry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown PSK identity")]
    UnknownPskIdentity,

    #[error("TLS error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),

    #[error("TLS handshake error: {0}")]
    TlsHandshake(String),

    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("malformed HTTP request: {0}")]
    MalformedHttp(String),

    #[error("unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),

    #[error("request body exceeds configured maximum ({0} bytes)")]
    BodyTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session '{0}' not found")]
    SessionNotFound(uuid::Uuid),

    #[error("APDU/TLV codec error: {0}")]
    Codec(#[from] gp_ota_apdu::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
