//! Top-level JSON-RPC client.
//!
//! `RpcClient::request` is the only entry point callers need. Internally a
//! call flows through:
//!
//! ```text
//! request → [DedupeCache] → [RetryPolicy] → transport
//!                                             ├─ BatchingTransport (optional)
//!                                             └─ FallbackTransport (2+ URLs) → HttpTransport…
//! ```
//!
//! Every failure comes back as a classified [`RpcError`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use rpcweave_core::dedupe::DedupeCache;
use rpcweave_core::error::RpcError;
use rpcweave_core::fallback::FallbackTransport;
use rpcweave_core::id::RequestIdGenerator;
use rpcweave_core::policy::{RetryConfig, RetryPolicy};
use rpcweave_core::request::JsonRpcRequest;
use rpcweave_core::transport::RpcTransport;

use crate::batch::BatchingTransport;
use crate::config::TransportConfig;
use crate::transport::HttpTransport;

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Share the outcome with identical concurrent calls.
    pub dedupe: bool,
    /// Overrides the client's uid for the dedupe key.
    pub uid: Option<String>,
}

impl RequestOptions {
    pub fn deduped() -> Self {
        Self {
            dedupe: true,
            uid: None,
        }
    }
}

/// JSON-RPC client over any [`RpcTransport`].
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    retry: RetryPolicy,
    dedupe: DedupeCache,
    ids: Arc<RequestIdGenerator>,
    uid: String,
}

impl RpcClient {
    /// Wrap an existing transport stack.
    pub fn new(transport: Arc<dyn RpcTransport>, retry: RetryConfig) -> Self {
        Self {
            transport,
            retry: RetryPolicy::new(retry),
            dedupe: DedupeCache::new(),
            ids: Arc::new(RequestIdGenerator::new()),
            uid: format!("client-{}", NEXT_UID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Build the full stack described by `config`.
    ///
    /// Must be called inside a Tokio runtime when batching or fallback
    /// ranking is enabled, since both own background tasks.
    pub fn from_config(config: &TransportConfig) -> Result<Self, RpcError> {
        let endpoints = config.endpoints();
        if endpoints.is_empty() {
            return Err(RpcError::unknown("no endpoint URL configured"));
        }

        let http_config = config.http_config();
        let mut transports = Vec::with_capacity(endpoints.len());
        for url in &endpoints {
            let http = HttpTransport::new(url.as_str(), http_config.clone())?;
            transports.push(Arc::new(http) as Arc<dyn RpcTransport>);
        }

        let mut transport: Arc<dyn RpcTransport> = if transports.len() == 1 {
            transports.remove(0)
        } else {
            FallbackTransport::new(transports, config.fallback_config())
        };

        if let Some(batch) = config.batch_config() {
            transport = BatchingTransport::new(transport, batch);
        }

        tracing::debug!(
            endpoints = endpoints.len(),
            batch = config.batch_config().is_some(),
            retry_count = config.retry_count,
            "rpc client configured"
        );

        let client = Self::new(transport, config.retry_config());
        Ok(match &config.uid {
            Some(uid) => client.with_uid(uid.clone()),
            None => client,
        })
    }

    /// Replace the client's uid (scopes dedupe keys).
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    /// Send `method` with `params` and return the raw result.
    pub async fn request(
        &self,
        method: &str,
        params: Vec<Value>,
        options: RequestOptions,
    ) -> Result<Value, RpcError> {
        let uid = options.uid.as_deref().unwrap_or(&self.uid);
        let key = DedupeCache::key(uid, method, &params);

        let transport = Arc::clone(&self.transport);
        let retry = self.retry.clone();
        let ids = Arc::clone(&self.ids);
        let method = method.to_string();

        self.dedupe
            .run(key, options.dedupe, move || async move {
                retry
                    .run(|| {
                        // Ids are assigned per attempt, at send time.
                        let req = JsonRpcRequest::new(ids.take(), method.clone(), params.clone());
                        dispatch(Arc::clone(&transport), req)
                    })
                    .await
            })
            .await
    }

    /// Call `method` and deserialize the result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.request(method, params, RequestOptions::default()).await?;
        serde_json::from_value(value).map_err(|e| {
            RpcError::unknown(format!("cannot decode result of {method}: {e}"))
        })
    }
}

async fn dispatch(transport: Arc<dyn RpcTransport>, req: JsonRpcRequest) -> Result<Value, RpcError> {
    let resp = transport.send(req).await?;
    resp.into_result().map_err(RpcError::from_payload)
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.transport.url())
            .field("uid", &self.uid)
            .field("retry", &self.retry)
            .finish()
    }
}
