//! rpcweave-http — HTTP transport, auto-batching and the top-level client.
//!
//! ```rust,no_run
//! use rpcweave_http::{RpcClient, TransportConfig};
//!
//! # async fn demo() -> Result<(), rpcweave_core::RpcError> {
//! let config = TransportConfig::for_urls(["https://a.example", "https://b.example"]);
//! let client = RpcClient::from_config(&config)?;
//! let block: String = client.call("eth_blockNumber", vec![]).await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod transport;

pub use batch::{BatchConfig, BatchingTransport};
pub use client::{RequestOptions, RpcClient};
pub use config::{BatchSetting, FallbackSettings, TransportConfig};
pub use transport::{HttpTransport, HttpTransportConfig};
