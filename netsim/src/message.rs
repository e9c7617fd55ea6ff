use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: String, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, id, method: method.into(), params }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// A parsed inbound message: either a response to a prior request (has
/// `id`) or a notification (no `id`, carries `method`/`params`).
#[derive(Debug, Deserialize)]
pub(crate) struct Inbound {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Inbound {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_absent_params() {
        let req = Request::new("1".into(), "ue.list", None);
        let encoded = serde_json::to_string(&req).unwrap();
        assert!(!encoded.contains("params"));
    }

    #[test]
    fn response_parses_result() {
        let raw = r#"{"jsonrpc":"2.0","id":"1","result":{"ok":true}}"#;
        let inbound: Inbound = serde_json::from_str(raw).unwrap();
        assert!(!inbound.is_notification());
        assert_eq!(inbound.result, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn notification_has_no_id() {
        let raw = r#"{"jsonrpc":"2.0","method":"ue.attached","params":{"imsi":"001010123456789"}}"#;
        let inbound: Inbound = serde_json::from_str(raw).unwrap();
        assert!(inbound.is_notification());
        assert_eq!(inbound.method.as_deref(), Some("ue.attached"));
    }
}
