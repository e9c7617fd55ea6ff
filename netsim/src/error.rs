/// JSON-RPC error codes the adapters are known to use, folded into the
/// reserved server-error range per the JSON-RPC 2.0 spec.
const CODE_RATE_LIMITED: i64 = -32429;
const CODE_NOT_AUTHENTICATED: i64 = -32401;
const CODE_RESOURCE_NOT_FOUND: i64 = -32404;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not connected to netsim adapter")]
    NotConnected,

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection lost")]
    ConnectionLost,

    #[error("rate limited{}", retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("resource not found: {resource_type:?}/{resource_id:?}")]
    ResourceNotFound { resource_type: Option<String>, resource_id: Option<String> },

    #[error("command error (code {code}): {message}")]
    CommandError { code: i64, message: String },

    #[error("invalid URL scheme '{0}', expected ws, wss, tcp, or tcps")]
    UnsupportedScheme(String),

    #[error("URL missing a hostname: {0}")]
    MissingHost(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed JSON-RPC message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Turns a JSON-RPC error object into the typed taxonomy; unknown codes
/// become a `CommandError` carrying the original code.
pub(crate) fn classify(code: i64, message: String, data: &serde_json::Value) -> Error {
    match code {
        CODE_RATE_LIMITED => Error::RateLimited { retry_after: data.get("retry_after").and_then(|v| v.as_u64()) },
        CODE_NOT_AUTHENTICATED => Error::NotAuthenticated,
        CODE_RESOURCE_NOT_FOUND => Error::ResourceNotFound {
            resource_type: data.get("resource_type").and_then(|v| v.as_str()).map(str::to_string),
            resource_id: data.get("resource_id").and_then(|v| v.as_str()).map(str::to_string),
        },
        other => Error::CommandError { code: other, message },
    }
}
