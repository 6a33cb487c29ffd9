//! External transport configuration.
//!
//! This is the surface consumed by callers that build a client from data
//! (JSON files, UI/session settings). It maps onto the per-component config
//! structs used by the rest of the stack.
//!
//! ```json
//! {
//!   "urls": ["https://a.example", "https://b.example"],
//!   "timeout_ms": 10000,
//!   "retry_count": 3,
//!   "retry_delay_ms": 150,
//!   "batch": { "wait_ms": 0, "batch_size": 1000 },
//!   "fallback": { "rank": true, "weights": { "stability": 0.7, "latency": 0.3 } }
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rpcweave_core::fallback::{FallbackConfig, FallbackWeights, RankConfig};
use rpcweave_core::policy::{RetryConfig, RetryDelay};

use crate::batch::BatchConfig;
use crate::transport::HttpTransportConfig;

/// Batching: `true`/`false` or explicit window options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchSetting {
    Enabled(bool),
    Options {
        #[serde(default)]
        wait_ms: u64,
        #[serde(default = "default_batch_size")]
        batch_size: usize,
    },
}

impl Default for BatchSetting {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

/// Fallback ranking options; only used with more than one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackSettings {
    #[serde(default)]
    pub rank: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_probe_method")]
    pub probe_method: String,
    #[serde(default)]
    pub weights: FallbackWeights,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            rank: false,
            interval_ms: default_interval_ms(),
            sample_count: default_sample_count(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_method: default_probe_method(),
            weights: FallbackWeights::default(),
        }
    }
}

/// Full client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Single endpoint shorthand; merged in front of `urls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Base delay for exponential backoff.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub batch: BatchSetting,
    #[serde(default)]
    pub fallback: FallbackSettings,
    /// Scopes request dedupe; generated per client when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: None,
            urls: Vec::new(),
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            batch: BatchSetting::default(),
            fallback: FallbackSettings::default(),
            uid: None,
            headers: BTreeMap::new(),
        }
    }
}

impl TransportConfig {
    /// Config for one or more endpoints with every other option defaulted.
    pub fn for_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// All configured endpoints, `url` first, without duplicates.
    pub fn endpoints(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.urls.len() + 1);
        for url in self.url.iter().chain(self.urls.iter()) {
            if !out.contains(url) {
                out.push(url.clone());
            }
        }
        out
    }

    pub fn http_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            retry_count: self.retry_count,
            delay: RetryDelay::Exponential(Duration::from_millis(self.retry_delay_ms)),
            should_retry: None,
        }
    }

    /// `None` when batching is disabled.
    pub fn batch_config(&self) -> Option<BatchConfig> {
        match &self.batch {
            BatchSetting::Enabled(false) => None,
            BatchSetting::Enabled(true) => Some(BatchConfig::default()),
            BatchSetting::Options {
                wait_ms,
                batch_size,
            } => Some(BatchConfig {
                wait: Duration::from_millis(*wait_ms),
                max_batch_size: *batch_size,
            }),
        }
    }

    pub fn fallback_config(&self) -> FallbackConfig {
        let f = &self.fallback;
        FallbackConfig {
            rank: f.rank.then(|| RankConfig {
                interval: Duration::from_millis(f.interval_ms),
                sample_count: f.sample_count,
                probe_timeout: Duration::from_millis(f.probe_timeout_ms),
                weights: f.weights,
            }),
            probe_method: f.probe_method.clone(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    150
}

fn default_batch_size() -> usize {
    1000
}

fn default_interval_ms() -> u64 {
    4_000
}

fn default_sample_count() -> usize {
    10
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}

fn default_probe_method() -> String {
    "net_listening".into()
}
