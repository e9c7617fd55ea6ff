/// Errors produced by the Card Simulator: Virtual UICC dispatch and the
/// client-role PSK-TLS/Admin HTTP drive loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("APDU/TLV codec error: {0}")]
    Codec(#[from] gp_ota_apdu::Error),

    #[error("SCP02 error: {0}")]
    Scp02(#[from] gp_ota_core::scp02::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),

    #[error("TLS handshake error: {0}")]
    TlsHandshake(String),

    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("malformed HTTP response: {0}")]
    MalformedHttp(String),

    #[error("unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),

    #[error("admin session aborted by server with status {0}")]
    AdminAborted(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("applet with AID {0} is already registered")]
    DuplicateAid(String),
}
