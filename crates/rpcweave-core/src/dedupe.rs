//! In-flight request deduplication.
//!
//! Identical concurrent calls share one operation. The operation runs in its
//! own task, so cancelling a caller never cancels it for the others. The
//! entry for a key lives exactly as long as its operation: it is removed when
//! the operation settles, before any attached caller observes the outcome,
//! so a later call with the same key starts a fresh operation.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::error::RpcError;

type SharedOutcome = Shared<BoxFuture<'static, Result<Value, RpcError>>>;

/// Collapses identical concurrent operations into one.
#[derive(Clone, Default)]
pub struct DedupeCache {
    entries: Arc<Mutex<HashMap<u64, SharedOutcome>>>,
}

impl DedupeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache key from the caller's uid, the method and its params.
    ///
    /// The uid keeps distinct clients from collapsing each other's calls.
    pub fn key(uid: &str, method: &str, params: &[Value]) -> u64 {
        let mut hasher = DefaultHasher::new();
        uid.hash(&mut hasher);
        method.hash(&mut hasher);
        // serde_json::Value is not Hash; its canonical text is.
        for param in params {
            param.to_string().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Number of operations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Run `operation`, sharing its outcome with concurrent callers of the same `key`.
    ///
    /// With `enabled == false` the operation runs directly and nothing is cached.
    /// Otherwise it is spawned onto the Tokio runtime.
    pub async fn run<F, Fut>(&self, key: u64, enabled: bool, operation: F) -> Result<Value, RpcError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        if !enabled {
            return operation().await;
        }

        let shared = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(&key) {
                Some(existing) => {
                    tracing::trace!(key, "joining in-flight request");
                    existing.clone()
                }
                None => {
                    let map = Arc::clone(&self.entries);
                    let fut = operation();
                    // Owned task: settles and evicts even if every caller is dropped.
                    let task = tokio::spawn(async move {
                        let outcome = fut.await;
                        map.lock().unwrap().remove(&key);
                        outcome
                    });
                    let shared = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(RpcError::unknown(format!("deduplicated request task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    entries.insert(key, shared.clone());
                    shared
                }
            }
        };

        shared.await
    }
}

impl std::fmt::Debug for DedupeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupeCache")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
