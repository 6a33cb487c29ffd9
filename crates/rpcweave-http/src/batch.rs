//! Auto-batching engine: coalesce requests issued within a time window.
//!
//! The first request opens a window and starts a `wait` timer. Requests
//! arriving before the timer fires join the same batch; reaching
//! `max_batch_size` flushes early and the next request opens a fresh window.
//! A flush is one wire call. Every request is re-keyed with a fresh id at
//! flush time so ids are unique within the call, and responses are matched
//! back by id regardless of the order the node returns them. Each caller
//! gets its response through a `oneshot` channel.
//!
//! # Usage
//! ```rust,no_run
//! use rpcweave_http::batch::{BatchConfig, BatchingTransport};
//! use rpcweave_http::HttpTransport;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), rpcweave_core::RpcError> {
//! let http = Arc::new(HttpTransport::default_for("https://rpc.example.com")?);
//! let batcher = BatchingTransport::new(http, BatchConfig::default());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;

use rpcweave_core::error::RpcError;
use rpcweave_core::id::RequestIdGenerator;
use rpcweave_core::request::{JsonRpcRequest, JsonRpcResponse, RpcId};
use rpcweave_core::transport::{HealthStatus, RpcTransport};

type ResponseSender = oneshot::Sender<Result<JsonRpcResponse, RpcError>>;

struct BatchItem {
    req: JsonRpcRequest,
    tx: ResponseSender,
}

/// Batch window configuration.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// How long a window stays open after its first request.
    pub wait: Duration,
    /// Flush as soon as a batch holds this many requests.
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            wait: Duration::ZERO,
            max_batch_size: 1000,
        }
    }
}

/// Auto-batching transport wrapper.
///
/// Owns a background task that groups pending requests into batch calls.
/// The task is aborted when the transport is dropped.
pub struct BatchingTransport {
    inner: Arc<dyn RpcTransport>,
    tx: mpsc::UnboundedSender<BatchItem>,
    scheduler: JoinHandle<()>,
}

impl BatchingTransport {
    /// Create a new batching transport wrapping `inner`.
    pub fn new(inner: Arc<dyn RpcTransport>, config: BatchConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<BatchItem>();
        let scheduler = tokio::spawn(schedule_loop(rx, Arc::clone(&inner), config));
        Arc::new(Self {
            inner,
            tx,
            scheduler,
        })
    }
}

impl Drop for BatchingTransport {
    fn drop(&mut self) {
        self.scheduler.abort();
    }
}

async fn schedule_loop(
    mut rx: mpsc::UnboundedReceiver<BatchItem>,
    transport: Arc<dyn RpcTransport>,
    config: BatchConfig,
) {
    let max = config.max_batch_size.max(1);
    let ids = Arc::new(RequestIdGenerator::new());

    loop {
        // Wait for the first item
        let first = match rx.recv().await {
            Some(item) => item,
            None => break, // channel closed
        };

        let mut batch = vec![first];

        // Collect items until the window closes or the batch is full
        let deadline = time::sleep(config.wait);
        tokio::pin!(deadline);

        while batch.len() < max {
            tokio::select! {
                biased;
                item = rx.recv() => {
                    match item {
                        Some(i) => batch.push(i),
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }

        tracing::debug!(batch_size = batch.len(), url = %transport.url(), "flushing batch");
        tokio::spawn(flush(batch, Arc::clone(&transport), Arc::clone(&ids)));
    }
}

async fn flush(
    batch: Vec<BatchItem>,
    transport: Arc<dyn RpcTransport>,
    ids: Arc<RequestIdGenerator>,
) {
    if batch.len() == 1 {
        // Single item — skip batch overhead
        let Some(mut item) = batch.into_iter().next() else {
            return;
        };
        let wire_id = ids.take();
        let caller_id = std::mem::replace(&mut item.req.id, RpcId::Number(wire_id));
        let result = transport.send(item.req).await.map(|mut resp| {
            resp.id = caller_id;
            resp
        });
        let _ = item.tx.send(result);
        return;
    }

    let mut slots: HashMap<u64, (RpcId, ResponseSender)> = HashMap::with_capacity(batch.len());
    let mut reqs = Vec::with_capacity(batch.len());
    for mut item in batch {
        let wire_id = ids.take();
        let caller_id = std::mem::replace(&mut item.req.id, RpcId::Number(wire_id));
        slots.insert(wire_id, (caller_id, item.tx));
        reqs.push(item.req);
    }

    match transport.send_batch(reqs).await {
        Ok(responses) => {
            // Match by id, not position: nodes may reorder.
            for mut resp in responses {
                let Some((caller_id, tx)) = resp.id.as_number().and_then(|id| slots.remove(&id)) else {
                    tracing::debug!(id = %resp.id, "dropping unmatched batch response");
                    continue;
                };
                resp.id = caller_id;
                let _ = tx.send(Ok(resp));
            }
            for (wire_id, (_, tx)) in slots {
                let _ = tx.send(Err(RpcError::unknown(format!(
                    "no response for request id {wire_id} in batch"
                ))));
            }
        }
        Err(e) => {
            // Broadcast the same error to all callers
            tracing::warn!(error = %e, batch_size = slots.len(), "batch call failed");
            for (_, (_, tx)) in slots {
                let _ = tx.send(Err(e.clone()));
            }
        }
    }
}

#[async_trait]
impl RpcTransport for BatchingTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(BatchItem { req, tx })
            .map_err(|_| RpcError::unknown("batch scheduler stopped"))?;
        rx.await
            .map_err(|_| RpcError::unknown("batch flush task dropped"))?
    }

    fn health(&self) -> HealthStatus {
        self.inner.health()
    }

    fn url(&self) -> &str {
        self.inner.url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcweave_core::request::JsonRpcError;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Records every wire call and answers each request with its method name,
    /// returning batch responses in reverse order.
    #[derive(Default)]
    struct RecordingTransport {
        singles: Mutex<Vec<JsonRpcRequest>>,
        batches: Mutex<Vec<Vec<JsonRpcRequest>>>,
        fail_batches: bool,
        drop_last_response: bool,
    }

    #[async_trait]
    impl RpcTransport for RecordingTransport {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
            self.singles.lock().unwrap().push(req.clone());
            Ok(JsonRpcResponse::success(req.id, Value::String(req.method)))
        }

        async fn send_batch(
            &self,
            reqs: Vec<JsonRpcRequest>,
        ) -> Result<Vec<JsonRpcResponse>, RpcError> {
            self.batches.lock().unwrap().push(reqs.clone());
            if self.fail_batches {
                return Err(RpcError::http("mock://batch", Some(502), "bad gateway", None));
            }
            let mut responses: Vec<JsonRpcResponse> = reqs
                .into_iter()
                .map(|r| {
                    if r.method == "boom" {
                        JsonRpcResponse::failure(
                            r.id,
                            JsonRpcError {
                                code: -32601,
                                message: "nope".into(),
                                data: None,
                            },
                        )
                    } else {
                        JsonRpcResponse::success(r.id, Value::String(r.method))
                    }
                })
                .collect();
            responses.reverse();
            if self.drop_last_response {
                responses.remove(0);
            }
            Ok(responses)
        }

        fn url(&self) -> &str {
            "mock://batch"
        }
    }

    fn request(id: u64, method: &str) -> JsonRpcRequest {
        JsonRpcRequest::new(id, method, vec![json!(id)])
    }

    fn config(wait_ms: u64, max: usize) -> BatchConfig {
        BatchConfig {
            wait: Duration::from_millis(wait_ms),
            max_batch_size: max,
        }
    }

    #[tokio::test]
    async fn window_collapses_into_one_wire_call() {
        let mock = Arc::new(RecordingTransport::default());
        let batcher = BatchingTransport::new(mock.clone(), config(10, 100));

        let (a, b, c) = tokio::join!(
            batcher.send(request(100, "eth_chainId")),
            batcher.send(request(200, "eth_blockNumber")),
            batcher.send(request(300, "eth_gasPrice")),
        );

        let batches = mock.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert!(mock.singles.lock().unwrap().is_empty());

        // Reversed server order still reaches the right caller, with the caller's id.
        let a = a.unwrap();
        assert_eq!(a.id, RpcId::Number(100));
        assert_eq!(a.into_result().unwrap(), json!("eth_chainId"));
        assert_eq!(b.unwrap().into_result().unwrap(), json!("eth_blockNumber"));
        assert_eq!(c.unwrap().into_result().unwrap(), json!("eth_gasPrice"));
    }

    #[tokio::test]
    async fn wire_ids_are_unique_within_a_batch() {
        let mock = Arc::new(RecordingTransport::default());
        let batcher = BatchingTransport::new(mock.clone(), config(10, 100));

        // Callers reuse the same id.
        let (a, b) = tokio::join!(
            batcher.send(request(1, "eth_chainId")),
            batcher.send(request(1, "eth_gasPrice")),
        );
        assert_eq!(a.unwrap().into_result().unwrap(), json!("eth_chainId"));
        assert_eq!(b.unwrap().into_result().unwrap(), json!("eth_gasPrice"));

        let batches = mock.batches.lock().unwrap();
        assert_ne!(batches[0][0].id, batches[0][1].id);
    }

    #[tokio::test]
    async fn max_batch_size_forces_early_flush() {
        let mock = Arc::new(RecordingTransport::default());
        let batcher = BatchingTransport::new(mock.clone(), config(50, 2));

        let results = futures::future::join_all(
            (0..5).map(|i| batcher.send(request(i, &format!("m{i}")))),
        )
        .await;
        for (i, r) in results.into_iter().enumerate() {
            assert_eq!(r.unwrap().into_result().unwrap(), json!(format!("m{i}")));
        }

        let batch_sizes: Vec<usize> = mock.batches.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(batch_sizes, vec![2, 2]);
        assert_eq!(mock.singles.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn single_request_skips_batch_body() {
        let mock = Arc::new(RecordingTransport::default());
        let batcher = BatchingTransport::new(mock.clone(), config(5, 100));

        let resp = batcher.send(request(9, "eth_chainId")).await.unwrap();
        assert_eq!(resp.id, RpcId::Number(9));
        assert!(mock.batches.lock().unwrap().is_empty());
        assert_eq!(mock.singles.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_rejects_every_item() {
        let mock = Arc::new(RecordingTransport {
            fail_batches: true,
            ..Default::default()
        });
        let batcher = BatchingTransport::new(mock.clone(), config(10, 100));

        let (a, b) = tokio::join!(
            batcher.send(request(1, "eth_chainId")),
            batcher.send(request(2, "eth_gasPrice")),
        );
        for r in [a, b] {
            match r.unwrap_err() {
                RpcError::HttpRequestError { status, .. } => assert_eq!(status, Some(502)),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn rpc_errors_stay_per_item() {
        let mock = Arc::new(RecordingTransport::default());
        let batcher = BatchingTransport::new(mock.clone(), config(10, 100));

        let (ok, bad) = tokio::join!(
            batcher.send(request(1, "eth_chainId")),
            batcher.send(request(2, "boom")),
        );
        assert!(ok.unwrap().is_ok());
        assert_eq!(bad.unwrap().into_result().unwrap_err().code, -32601);
    }

    #[tokio::test]
    async fn missing_response_rejects_only_that_item() {
        let mock = Arc::new(RecordingTransport {
            drop_last_response: true,
            ..Default::default()
        });
        let batcher = BatchingTransport::new(mock.clone(), config(10, 100));

        let (a, b) = tokio::join!(
            batcher.send(request(1, "eth_chainId")),
            batcher.send(request(2, "eth_gasPrice")),
        );
        // Responses are reversed, so the dropped one belongs to the second caller.
        assert!(a.unwrap().is_ok());
        assert!(matches!(b, Err(RpcError::UnknownError(_))));
    }
}
