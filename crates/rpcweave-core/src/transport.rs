//! `RpcTransport`: the seam between the client and everything that moves bytes.
//!
//! HTTP endpoints, the batch scheduler and the fallback router all implement
//! it, so they stack in any order.

use async_trait::async_trait;

use crate::error::RpcError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Coarse endpoint health, as reported by [`RpcTransport::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Every recent probe succeeded.
    Healthy,
    /// Some endpoints failed their latest probe.
    Degraded,
    /// No endpoint passed its latest probe.
    Unhealthy,
    /// Not sampled yet, or the transport does not track health.
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// An async JSON-RPC transport.
///
/// A transport returns `Ok` whenever a node produced a well-formed JSON-RPC
/// reply, including replies that carry an `error` object. `Err` is reserved
/// for failures where no such reply exists (HTTP, timeout, structural).
///
/// Stacks are built as `Arc<dyn RpcTransport>` and shared across tasks.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// One request, one reply.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError>;

    /// Several requests in one call.
    ///
    /// Replies may come back in any order and must be matched by id. The
    /// default sends them one at a time through [`send`](Self::send).
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        let mut responses = Vec::with_capacity(reqs.len());
        for req in reqs {
            responses.push(self.send(req).await?);
        }
        Ok(responses)
    }

    /// Latest health summary; `Unknown` unless the transport samples.
    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Endpoint URL, or a fixed label for composite transports.
    fn url(&self) -> &str;
}
