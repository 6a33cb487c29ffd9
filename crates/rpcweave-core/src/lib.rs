//! rpcweave-core — foundation traits and types for rpcweave.
//!
//! # Overview
//!
//! rpcweave is a JSON-RPC client stack for blockchain nodes. It turns a
//! logical call into one or more network requests, tolerates flaky
//! endpoints and rate limits, and always reports failures through one
//! closed error type. The core crate defines:
//!
//! - [`RpcTransport`] — the central async trait every transport implements
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] — wire types
//! - [`RpcError`] — the classified error taxonomy
//! - [`RequestIdGenerator`] — monotonic request ids
//! - [`DedupeCache`] — collapses identical in-flight calls
//! - [`policy`] module — classified retry with backoff
//! - [`fallback`] module — multi-endpoint routing with health ranking

pub mod dedupe;
pub mod error;
pub mod fallback;
pub mod id;
pub mod policy;
pub mod request;
pub mod transport;

pub use dedupe::DedupeCache;
pub use error::{classify, RawFailure, RpcError};
pub use fallback::{FallbackConfig, FallbackTransport, FallbackWeights, RankConfig, RankState};
pub use id::RequestIdGenerator;
pub use policy::{RetryConfig, RetryDelay, RetryPolicy};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam};
pub use transport::{HealthStatus, RpcTransport};
