//! JSON-RPC 2.0 wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id echoed back by the node.
///
/// Ids generated here are always numeric; batch replies are matched on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl RpcId {
    pub fn number(n: u64) -> Self {
        Self::Number(n)
    }

    /// Numeric value, if this id is a number.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Positional parameter.
pub type RpcParam = Value;

/// One JSON-RPC 2.0 call as it goes on the wire.
///
/// The batch scheduler swaps `id` for a fresh one at flush time and restores
/// the caller's id on the reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<RpcParam>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    /// Request with a numeric id.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<RpcParam>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// Error object from a reply; [`crate::RpcError::from_payload`] classifies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A node's reply.
///
/// Transports hand it back as `Ok` even when `error` is set; only the
/// client turns the error object into an `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// `result` present and no `error`.
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }

    /// The result (`null` when the node omitted it) or the error object.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(1, "eth_blockNumber", vec![]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_blockNumber\""));
        assert!(json.contains("\"params\":[]"));
    }

    #[test]
    fn response_into_result_ok() {
        let resp = JsonRpcResponse::success(RpcId::Number(1), Value::String("0x12345".into()));
        assert!(resp.is_ok());
        let val = resp.into_result().unwrap();
        assert_eq!(val, Value::String("0x12345".into()));
    }

    #[test]
    fn response_into_result_error() {
        let resp = JsonRpcResponse::failure(
            RpcId::Number(1),
            JsonRpcError {
                code: -32000,
                message: "execution reverted".into(),
                data: None,
            },
        );
        assert!(!resp.is_ok());
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32000);
    }

    #[test]
    fn decode_matching_response_keeps_id_and_result() {
        let req = JsonRpcRequest::new(
            42,
            "eth_getStorageAt",
            vec![json!("0xabc"), json!("0x0"), json!("latest")],
        );
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["id"], 42);

        let result = json!({"nested": [1, 2, {"x": "0x00"}]});
        let raw = json!({"jsonrpc": "2.0", "id": wire["id"], "result": result});
        let resp: JsonRpcResponse = serde_json::from_value(raw).unwrap();

        assert_eq!(resp.id, req.id);
        assert_eq!(resp.into_result().unwrap(), result);
    }

    #[test]
    fn null_result_is_success() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }
}
