//! Multi-endpoint fallback transport with latency/stability ranking.
//!
//! Calls go to the best-ranked endpoint first and walk down the list on
//! transport-level failures. When ranking is enabled a background task
//! probes every endpoint each `interval`, keeps the last `sample_count`
//! samples per endpoint and re-sorts the list by
//! `stability * w_s + (1 - latency / max_latency) * w_l`.
//!
//! State transitions:
//! - `Idle` → `Sampling`:   first probe round starts
//! - `Sampling` → `Ranked`: scores recomputed, list re-sorted
//! - `Ranked` → `Sampling`: next round after `interval`
//!
//! The endpoint set never shrinks: an endpoint failing every probe scores 0
//! and sinks to the back, but is still tried as a last resort.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::RpcError;
use crate::id::RequestIdGenerator;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{HealthStatus, RpcTransport};

/// Floor for the background sampling interval.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Relative weight of stability and latency in an endpoint's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallbackWeights {
    pub stability: f64,
    pub latency: f64,
}

impl Default for FallbackWeights {
    fn default() -> Self {
        Self {
            stability: 0.7,
            latency: 0.3,
        }
    }
}

/// Health sampling configuration.
#[derive(Debug, Clone)]
pub struct RankConfig {
    /// Time between sampling rounds.
    pub interval: Duration,
    /// Rolling window of samples kept per endpoint.
    pub sample_count: usize,
    /// Timeout for each liveness probe.
    pub probe_timeout: Duration,
    pub weights: FallbackWeights,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(4),
            sample_count: 10,
            probe_timeout: Duration::from_secs(1),
            weights: FallbackWeights::default(),
        }
    }
}

/// Configuration for the fallback transport.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Background ranking; `None` keeps the configured order until
    /// [`FallbackTransport::sample_now`] is called.
    pub rank: Option<RankConfig>,
    /// Cheap method used as a liveness probe.
    pub probe_method: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            rank: None,
            probe_method: "net_listening".into(),
        }
    }
}

/// Ranking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankState {
    Idle,
    Sampling,
    Ranked,
}

impl std::fmt::Display for RankState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Sampling => write!(f, "sampling"),
            Self::Ranked => write!(f, "ranked"),
        }
    }
}

/// Outcome of one liveness probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSample {
    /// Index of the endpoint in configuration order.
    pub transport: usize,
    pub latency: Duration,
    pub success: bool,
}

struct RankTable {
    state: RankState,
    /// Endpoint indices, best first.
    order: Vec<usize>,
    scores: Vec<f64>,
    samples: Vec<VecDeque<HealthSample>>,
}

/// Routes calls across several transports, best-ranked first.
pub struct FallbackTransport {
    transports: Vec<Arc<dyn RpcTransport>>,
    table: Mutex<RankTable>,
    config: FallbackConfig,
    probe_ids: RequestIdGenerator,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl FallbackTransport {
    /// Build a fallback transport; starts background sampling when
    /// `config.rank` is set (requires a Tokio runtime).
    pub fn new(transports: Vec<Arc<dyn RpcTransport>>, config: FallbackConfig) -> Arc<Self> {
        let n = transports.len();
        let fallback = Arc::new(Self {
            transports,
            table: Mutex::new(RankTable {
                state: RankState::Idle,
                order: (0..n).collect(),
                scores: vec![0.0; n],
                samples: vec![VecDeque::new(); n],
            }),
            config,
            probe_ids: RequestIdGenerator::new(),
            sampler: Mutex::new(None),
        });

        if let Some(rank) = &fallback.config.rank {
            let interval = rank.interval.max(MIN_SAMPLE_INTERVAL);
            let handle = tokio::spawn(sample_loop(Arc::downgrade(&fallback), interval));
            *fallback.sampler.lock().unwrap() = Some(handle);
        }

        fallback
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    pub fn rank_state(&self) -> RankState {
        self.table.lock().unwrap().state
    }

    /// Current routing order as configuration indices, best first.
    pub fn order(&self) -> Vec<usize> {
        self.table.lock().unwrap().order.clone()
    }

    /// `(url, score)` per endpoint in routing order.
    pub fn ranking(&self) -> Vec<(String, f64)> {
        let table = self.table.lock().unwrap();
        table
            .order
            .iter()
            .map(|&i| (self.transports[i].url().to_string(), table.scores[i]))
            .collect()
    }

    /// Probe every endpoint once and re-rank.
    pub async fn sample_now(&self) {
        let rank = self.config.rank.clone().unwrap_or_default();
        self.table.lock().unwrap().state = RankState::Sampling;

        let probes = self.transports.iter().enumerate().map(|(index, transport)| {
            let req = JsonRpcRequest::new(
                self.probe_ids.take(),
                self.config.probe_method.clone(),
                vec![],
            );
            let timeout = rank.probe_timeout;
            async move {
                let start = Instant::now();
                let outcome = tokio::time::timeout(timeout, transport.send(req)).await;
                let success = matches!(&outcome, Ok(Ok(resp)) if resp.error.is_none());
                HealthSample {
                    transport: index,
                    latency: start.elapsed(),
                    success,
                }
            }
        });
        let samples = futures::future::join_all(probes).await;

        let mut table = self.table.lock().unwrap();
        let window = rank.sample_count.max(1);
        for sample in samples {
            let slot = &mut table.samples[sample.transport];
            slot.push_back(sample);
            while slot.len() > window {
                slot.pop_front();
            }
        }

        let scores = compute_scores(&table.samples, rank.weights);
        let mut order: Vec<usize> = (0..self.transports.len()).collect();
        // Stable sort: ties keep configuration order.
        order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));

        tracing::debug!(?order, ?scores, "fallback ranking updated");
        table.scores = scores;
        table.order = order;
        table.state = RankState::Ranked;
    }

    /// Try each endpoint in rank order until one produces a reply.
    async fn route<T, F, Fut>(&self, mut call: F) -> Result<T, RpcError>
    where
        F: FnMut(Arc<dyn RpcTransport>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        // Snapshot: re-ranking mid-call must not affect this call.
        let order = self.order();
        let mut last_err = None;

        for idx in order {
            let transport = Arc::clone(&self.transports[idx]);
            let url = transport.url().to_string();
            match call(transport).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport_level() => {
                    tracing::warn!(url = %url, error = %e, "endpoint failed, falling back");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| RpcError::unknown("no transports configured")))
    }
}

async fn sample_loop(fallback: Weak<FallbackTransport>, interval: Duration) {
    loop {
        let Some(this) = fallback.upgrade() else {
            break;
        };
        this.sample_now().await;
        drop(this);
        tokio::time::sleep(interval).await;
    }
}

/// Score each endpoint from its sample window.
///
/// Endpoints with no successful sample score 0.
fn compute_scores(samples: &[VecDeque<HealthSample>], weights: FallbackWeights) -> Vec<f64> {
    let mean_latency: Vec<f64> = samples
        .iter()
        .map(|window| {
            if window.is_empty() {
                0.0
            } else {
                window.iter().map(|s| s.latency.as_secs_f64()).sum::<f64>() / window.len() as f64
            }
        })
        .collect();
    let max_latency = mean_latency.iter().copied().fold(0.0, f64::max);

    samples
        .iter()
        .zip(&mean_latency)
        .map(|(window, &latency)| {
            if window.is_empty() {
                return 0.0;
            }
            let successes = window.iter().filter(|s| s.success).count();
            if successes == 0 {
                return 0.0;
            }
            let stability = successes as f64 / window.len() as f64;
            let latency_score = if max_latency > 0.0 {
                1.0 - latency / max_latency
            } else {
                1.0
            };
            stability * weights.stability + latency_score * weights.latency
        })
        .collect()
}

impl Drop for FallbackTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.sampler.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl RpcTransport for FallbackTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        self.route(|t| {
            let req = req.clone();
            async move { t.send(req).await }
        })
        .await
    }

    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        self.route(|t| {
            let reqs = reqs.clone();
            async move { t.send_batch(reqs).await }
        })
        .await
    }

    fn health(&self) -> HealthStatus {
        let table = self.table.lock().unwrap();
        if table.state == RankState::Idle {
            return HealthStatus::Unknown;
        }
        let healthy = table
            .samples
            .iter()
            .filter(|w| w.back().is_some_and(|s| s.success))
            .count();
        match healthy {
            0 => HealthStatus::Unhealthy,
            n if n == self.transports.len() => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        }
    }

    fn url(&self) -> &str {
        "fallback"
    }
}
