//! Single-endpoint HTTP JSON-RPC transport backed by `reqwest`.
//!
//! One call is one HTTP POST raced against `timeout`. On expiry the
//! in-flight exchange is dropped and [`RpcError::TimeoutError`] returned.
//! Non-2xx statuses and bodies that are not JSON-RPC come back as
//! [`RpcError::HttpRequestError`] with whatever body was received.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;

use rpcweave_core::error::RpcError;
use rpcweave_core::request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use rpcweave_core::transport::RpcTransport;

/// Called with the serialized body before each request is sent.
pub type RequestHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// Called with the HTTP status and raw body of each response.
pub type ResponseHook = Arc<dyn Fn(u16, &str) + Send + Sync>;

/// Configuration for [`HttpTransport`].
#[derive(Clone)]
pub struct HttpTransportConfig {
    pub timeout: Duration,
    /// Extra headers sent with every request (e.g. API keys).
    pub headers: Vec<(String, String)>,
    pub on_request: Option<RequestHook>,
    pub on_response: Option<ResponseHook>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            headers: Vec::new(),
            on_request: None,
            on_response: None,
        }
    }
}

impl std::fmt::Debug for HttpTransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransportConfig")
            .field("timeout", &self.timeout)
            .field("headers", &self.headers.len())
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .finish()
    }
}

/// HTTP JSON-RPC transport for one endpoint.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Create a new transport for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpTransportConfig) -> Result<Self, RpcError> {
        let url = url.into();
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RpcError::http(&url, None, e.to_string(), None))?;
        Ok(Self { url, http, config })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::new(url, HttpTransportConfig::default())
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// POST `body` and return the status with the parsed JSON reply.
    async fn post(&self, body: Value) -> Result<(u16, Value), RpcError> {
        if let Some(hook) = &self.config.on_request {
            hook(&body);
        }

        let exchange = async {
            let mut builder = self.http.post(&self.url).json(&body);
            for (name, value) in &self.config.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let resp = builder
                .send()
                .await
                .map_err(|e| RpcError::http(&self.url, None, e.to_string(), None))?;

            let status = resp.status();
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = resp
                .text()
                .await
                .map_err(|e| RpcError::http(&self.url, Some(status.as_u16()), e.to_string(), None))?;

            if let Some(hook) = &self.config.on_response {
                hook(status.as_u16(), &text);
            }

            if !status.is_success() {
                return Err(RpcError::http(&self.url, Some(status.as_u16()), text, retry_after));
            }

            match serde_json::from_str::<Value>(&text) {
                Ok(value) => Ok((status.as_u16(), value)),
                Err(_) => Err(RpcError::http(&self.url, Some(status.as_u16()), text, None)),
            }
        };

        tokio::time::timeout(self.config.timeout, exchange)
            .await
            .map_err(|_| {
                tracing::debug!(url = %self.url, timeout_ms = self.config.timeout.as_millis() as u64, "request timed out");
                RpcError::timeout(&self.url, self.config.timeout)
            })?
    }

    /// Error for a 2xx reply that is valid JSON but not JSON-RPC.
    fn structural(&self, status: u16, value: &Value) -> RpcError {
        RpcError::HttpRequestError {
            url: self.url.clone(),
            status: Some(status),
            body: value.clone(),
            retry_after: None,
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let body = serde_json::to_value(&req).map_err(|e| RpcError::unknown(e.to_string()))?;
        let (status, value) = self.post(body).await?;
        serde_json::from_value::<JsonRpcResponse>(value.clone())
            .map_err(|_| self.structural(status, &value))
    }

    /// True HTTP batch: send all requests as a JSON array in one HTTP call.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }

        let body = serde_json::to_value(&reqs).map_err(|e| RpcError::unknown(e.to_string()))?;
        let (status, value) = self.post(body).await?;

        if value.is_array() {
            return serde_json::from_value::<Vec<JsonRpcResponse>>(value.clone())
                .map_err(|_| self.structural(status, &value));
        }

        // Some nodes reject a whole batch with one error object.
        match value.get("error").cloned().map(serde_json::from_value::<JsonRpcError>) {
            Some(Ok(payload)) => Err(RpcError::from_payload(payload)),
            _ => Err(self.structural(status, &value)),
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}
