//! Error taxonomy — every failure surfaced to a caller is one [`RpcError`] variant.
//!
//! Classification is a pure, total function: JSON-RPC error payloads are
//! looked up by exact code in [`CODE_TABLE`], HTTP failures carry their
//! status and best-effort body, and anything unrecognised becomes
//! [`RpcError::UnknownError`] with the original code and message preserved.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::request::JsonRpcError;

/// HTTP statuses that indicate a transient upstream condition.
pub const RETRYABLE_STATUSES: &[u16] = &[403, 408, 413, 429, 500, 502, 503, 504];

/// Classified RPC failure.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("parse error ({}): {}", .0.code, .0.message)]
    ParseError(JsonRpcError),

    #[error("invalid request ({}): {}", .0.code, .0.message)]
    InvalidRequest(JsonRpcError),

    #[error("method not found ({}): {}", .0.code, .0.message)]
    MethodNotFound(JsonRpcError),

    #[error("invalid params ({}): {}", .0.code, .0.message)]
    InvalidParams(JsonRpcError),

    #[error("internal error ({}): {}", .0.code, .0.message)]
    InternalError(JsonRpcError),

    #[error("invalid input ({}): {}", .0.code, .0.message)]
    InvalidInput(JsonRpcError),

    #[error("resource not found ({}): {}", .0.code, .0.message)]
    ResourceNotFound(JsonRpcError),

    #[error("resource unavailable ({}): {}", .0.code, .0.message)]
    ResourceUnavailable(JsonRpcError),

    #[error("transaction rejected ({}): {}", .0.code, .0.message)]
    TransactionRejected(JsonRpcError),

    #[error("method not supported ({}): {}", .0.code, .0.message)]
    MethodNotSupported(JsonRpcError),

    /// Request rate or size limit exceeded — caller should back off.
    #[error("limit exceeded ({}): {}", .0.code, .0.message)]
    LimitExceeded(JsonRpcError),

    #[error("JSON-RPC version unsupported ({}): {}", .0.code, .0.message)]
    VersionUnsupported(JsonRpcError),

    /// The user declined the action in their wallet. Never retried.
    #[error("user rejected the request ({}): {}", .0.code, .0.message)]
    UserRejected(JsonRpcError),

    #[error("unauthorized ({}): {}", .0.code, .0.message)]
    Unauthorized(JsonRpcError),

    #[error("unsupported method ({}): {}", .0.code, .0.message)]
    UnsupportedMethod(JsonRpcError),

    #[error("provider disconnected ({}): {}", .0.code, .0.message)]
    Disconnected(JsonRpcError),

    #[error("chain disconnected ({}): {}", .0.code, .0.message)]
    ChainDisconnected(JsonRpcError),

    #[error("switch chain failed ({}): {}", .0.code, .0.message)]
    SwitchChainFailed(JsonRpcError),

    /// The HTTP exchange failed: connection error, non-2xx status, or a body
    /// that is not valid JSON-RPC.
    #[error("HTTP request to {url} failed{}: {body}", status_suffix(.status))]
    HttpRequestError {
        url: String,
        /// `None` when no response was received at all.
        status: Option<u16>,
        /// Response body, parsed as JSON when possible, raw text otherwise.
        body: Value,
        /// `Retry-After` hint in whole seconds.
        retry_after: Option<u64>,
    },

    #[error("request to {url} timed out after {ms}ms")]
    TimeoutError { url: String, ms: u64 },

    #[error("unknown error ({}): {}", .0.code, .0.message)]
    UnknownError(JsonRpcError),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" with status {s}"),
        None => String::new(),
    }
}

type Constructor = fn(JsonRpcError) -> RpcError;

/// Exact-code lookup table for JSON-RPC error payloads.
pub const CODE_TABLE: &[(i64, Constructor)] = &[
    (-32700, RpcError::ParseError),
    (-32600, RpcError::InvalidRequest),
    (-32601, RpcError::MethodNotFound),
    (-32602, RpcError::InvalidParams),
    (-32603, RpcError::InternalError),
    (-32000, RpcError::InvalidInput),
    (-32001, RpcError::ResourceNotFound),
    (-32002, RpcError::ResourceUnavailable),
    (-32003, RpcError::TransactionRejected),
    (-32004, RpcError::MethodNotSupported),
    (-32005, RpcError::LimitExceeded),
    (-32006, RpcError::VersionUnsupported),
    (-1, RpcError::InternalError),
    (4001, RpcError::UserRejected),
    (4100, RpcError::Unauthorized),
    (4200, RpcError::UnsupportedMethod),
    (4900, RpcError::Disconnected),
    (4901, RpcError::ChainDisconnected),
    (4902, RpcError::SwitchChainFailed),
    // CAIP-25 "user disapproved requested methods"
    (5000, RpcError::UserRejected),
];

/// Raw failure data before classification.
#[derive(Debug, Clone)]
pub enum RawFailure {
    /// A decoded JSON-RPC error object.
    Rpc(JsonRpcError),
    /// An HTTP-layer failure.
    Http {
        url: String,
        status: Option<u16>,
        body: String,
        retry_after: Option<u64>,
    },
    /// The exchange did not complete within `timeout`.
    Timeout { url: String, timeout: Duration },
}

/// Map raw failure data onto the closed [`RpcError`] taxonomy.
pub fn classify(raw: RawFailure) -> RpcError {
    match raw {
        RawFailure::Rpc(payload) => match CODE_TABLE.iter().find(|(code, _)| *code == payload.code) {
            Some((_, ctor)) => ctor(payload),
            None => RpcError::UnknownError(payload),
        },
        RawFailure::Http {
            url,
            status,
            body,
            retry_after,
        } => {
            let body = serde_json::from_str(&body).unwrap_or(Value::String(body));
            RpcError::HttpRequestError {
                url,
                status,
                body,
                retry_after,
            }
        }
        RawFailure::Timeout { url, timeout } => RpcError::TimeoutError {
            url,
            ms: timeout.as_millis() as u64,
        },
    }
}

impl From<JsonRpcError> for RpcError {
    fn from(payload: JsonRpcError) -> Self {
        classify(RawFailure::Rpc(payload))
    }
}

impl RpcError {
    /// Classify a JSON-RPC error payload.
    pub fn from_payload(payload: JsonRpcError) -> Self {
        payload.into()
    }

    /// Classify an HTTP-layer failure.
    pub fn http(
        url: impl Into<String>,
        status: Option<u16>,
        body: impl Into<String>,
        retry_after: Option<u64>,
    ) -> Self {
        classify(RawFailure::Http {
            url: url.into(),
            status,
            body: body.into(),
            retry_after,
        })
    }

    pub fn timeout(url: impl Into<String>, timeout: Duration) -> Self {
        classify(RawFailure::Timeout {
            url: url.into(),
            timeout,
        })
    }

    /// A failure raised by the client itself rather than a node (code 0).
    pub fn unknown(message: impl Into<String>) -> Self {
        RpcError::UnknownError(JsonRpcError {
            code: 0,
            message: message.into(),
            data: None,
        })
    }

    /// The JSON-RPC payload carried by code-classified variants.
    pub fn payload(&self) -> Option<&JsonRpcError> {
        match self {
            Self::ParseError(p)
            | Self::InvalidRequest(p)
            | Self::MethodNotFound(p)
            | Self::InvalidParams(p)
            | Self::InternalError(p)
            | Self::InvalidInput(p)
            | Self::ResourceNotFound(p)
            | Self::ResourceUnavailable(p)
            | Self::TransactionRejected(p)
            | Self::MethodNotSupported(p)
            | Self::LimitExceeded(p)
            | Self::VersionUnsupported(p)
            | Self::UserRejected(p)
            | Self::Unauthorized(p)
            | Self::UnsupportedMethod(p)
            | Self::Disconnected(p)
            | Self::ChainDisconnected(p)
            | Self::SwitchChainFailed(p)
            | Self::UnknownError(p) => Some(p),
            Self::HttpRequestError { .. } | Self::TimeoutError { .. } => None,
        }
    }

    /// The original JSON-RPC code, if any.
    pub fn code(&self) -> Option<i64> {
        self.payload().map(|p| p.code)
    }

    /// The HTTP status, for [`RpcError::HttpRequestError`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpRequestError { status, .. } => *status,
            _ => None,
        }
    }

    /// `Retry-After` hint in seconds, if the upstream sent one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::HttpRequestError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Human-readable message without the variant prefix.
    pub fn message(&self) -> String {
        match self.payload() {
            Some(p) => p.message.clone(),
            None => self.to_string(),
        }
    }

    /// `true` when the call never produced a well-formed JSON-RPC reply.
    ///
    /// Only these errors move a fallback transport on to the next endpoint.
    pub fn is_transport_level(&self) -> bool {
        matches!(self, Self::HttpRequestError { .. } | Self::TimeoutError { .. })
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, Self::UserRejected(_))
    }

    /// `true` for the wallet-interaction variants (EIP-1193 4xxx codes).
    pub fn is_wallet_error(&self) -> bool {
        matches!(
            self,
            Self::UserRejected(_)
                | Self::Unauthorized(_)
                | Self::UnsupportedMethod(_)
                | Self::Disconnected(_)
                | Self::ChainDisconnected(_)
                | Self::SwitchChainFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(code: i64) -> JsonRpcError {
        JsonRpcError {
            code,
            message: format!("boom {code}"),
            data: None,
        }
    }

    #[test]
    fn standard_codes_map_to_variants() {
        assert!(matches!(RpcError::from_payload(payload(-32700)), RpcError::ParseError(_)));
        assert!(matches!(RpcError::from_payload(payload(-32600)), RpcError::InvalidRequest(_)));
        assert!(matches!(RpcError::from_payload(payload(-32601)), RpcError::MethodNotFound(_)));
        assert!(matches!(RpcError::from_payload(payload(-32602)), RpcError::InvalidParams(_)));
        assert!(matches!(RpcError::from_payload(payload(-32603)), RpcError::InternalError(_)));
        assert!(matches!(RpcError::from_payload(payload(-32005)), RpcError::LimitExceeded(_)));
    }

    #[test]
    fn wallet_codes_map_to_variants() {
        assert!(RpcError::from_payload(payload(4001)).is_user_rejection());
        assert!(RpcError::from_payload(payload(5000)).is_user_rejection());
        assert!(matches!(RpcError::from_payload(payload(4902)), RpcError::SwitchChainFailed(_)));
        assert!(RpcError::from_payload(payload(4900)).is_wallet_error());
    }

    #[test]
    fn unknown_code_preserves_payload() {
        let err = RpcError::from_payload(JsonRpcError {
            code: -32099,
            message: "custom provider failure".into(),
            data: Some(Value::from("0xdead")),
        });
        match &err {
            RpcError::UnknownError(p) => {
                assert_eq!(p.code, -32099);
                assert_eq!(p.message, "custom provider failure");
                assert_eq!(p.data, Some(Value::from("0xdead")));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(err.code(), Some(-32099));
    }

    #[test]
    fn minus_one_is_internal() {
        let err = RpcError::from_payload(payload(-1));
        assert!(matches!(err, RpcError::InternalError(_)));
        assert_eq!(err.code(), Some(-1));
    }

    #[test]
    fn http_body_parsed_when_json() {
        let err = RpcError::http("https://a", Some(500), r#"{"error":"down"}"#, None);
        match err {
            RpcError::HttpRequestError { status, body, .. } => {
                assert_eq!(status, Some(500));
                assert_eq!(body["error"], "down");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn http_body_falls_back_to_text() {
        let err = RpcError::http("https://a", Some(502), "<html>bad gateway</html>", Some(3));
        assert_eq!(err.retry_after(), Some(3));
        match err {
            RpcError::HttpRequestError { body, .. } => {
                assert_eq!(body, Value::String("<html>bad gateway</html>".into()));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn transport_level_split() {
        assert!(RpcError::timeout("https://a", Duration::from_secs(1)).is_transport_level());
        assert!(RpcError::http("https://a", None, "refused", None).is_transport_level());
        assert!(!RpcError::from_payload(payload(-32601)).is_transport_level());
    }

    #[test]
    fn timeout_display() {
        let err = RpcError::timeout("https://a", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "request to https://a timed out after 1500ms");
    }
}
