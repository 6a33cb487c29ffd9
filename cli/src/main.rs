//! rpcweave CLI — call, batch and rank JSON-RPC endpoints from the terminal.
//!
//! Usage:
//! ```bash
//! # Send one call (several --url flags enable fallback)
//! rpcweave call --url https://cloudflare-eth.com --method eth_blockNumber
//!
//! # Send several calls in one batch window
//! rpcweave batch --url https://cloudflare-eth.com --method eth_chainId --method eth_blockNumber
//!
//! # Sample every endpoint once and print the ranking
//! rpcweave rank --url https://a.example --url https://b.example
//!
//! # Latency and block number check
//! rpcweave test --url https://cloudflare-eth.com
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use rpcweave_core::fallback::FallbackTransport;
use rpcweave_core::transport::RpcTransport;
use rpcweave_http::config::BatchSetting;
use rpcweave_http::{HttpTransport, RequestOptions, RpcClient, TransportConfig};

#[derive(Parser)]
#[command(
    name = "rpcweave",
    about = "JSON-RPC client with batching, retry and endpoint fallback",
    long_about = "
rpcweave CLI: send JSON-RPC calls through the full client stack
(dedupe, retry, batching, fallback across endpoints).

ENVIRONMENT VARIABLES:
  RUST_LOG    Log filter, e.g. rpcweave_core=debug (overrides --verbose)
",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Endpoints {
    /// RPC endpoint URL; repeat for fallback
    #[arg(long = "url")]
    urls: Vec<String>,
    /// JSON transport config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single JSON-RPC call
    Call {
        #[command(flatten)]
        endpoints: Endpoints,
        /// Method name, e.g. eth_blockNumber
        #[arg(long)]
        method: String,
        /// Positional params as a JSON array
        #[arg(long, default_value = "[]")]
        params: String,
    },

    /// Send several parameterless calls in one batch window
    Batch {
        #[command(flatten)]
        endpoints: Endpoints,
        /// Method name; repeat for each call
        #[arg(long = "method", required = true)]
        methods: Vec<String>,
        /// Batch window in milliseconds
        #[arg(long, default_value_t = 10)]
        wait_ms: u64,
    },

    /// Sample every endpoint once and print the ranking
    Rank {
        #[command(flatten)]
        endpoints: Endpoints,
        /// Sampling rounds before printing
        #[arg(long, default_value_t = 1)]
        rounds: u32,
    },

    /// Check one endpoint: latency and block number
    Test {
        /// RPC endpoint URL
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Call {
            endpoints,
            method,
            params,
        } => cmd_call(&endpoints, &method, &params).await,
        Commands::Batch {
            endpoints,
            methods,
            wait_ms,
        } => cmd_batch(&endpoints, &methods, wait_ms).await,
        Commands::Rank { endpoints, rounds } => cmd_rank(&endpoints, rounds).await,
        Commands::Test { url } => cmd_test(&url).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ─── Command implementations ─────────────────────────────────────────────────

fn load_config(endpoints: &Endpoints) -> Result<TransportConfig> {
    let mut config = match &endpoints.config {
        Some(path) => read_config(path)?,
        None => TransportConfig::default(),
    };
    config.urls.extend(endpoints.urls.iter().cloned());
    if config.endpoints().is_empty() {
        bail!("at least one --url (or a config file with urls) is required");
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<TransportConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config file '{}'", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse config file '{}'", path.display()))
}

async fn cmd_call(endpoints: &Endpoints, method: &str, params: &str) -> Result<()> {
    let config = load_config(endpoints)?;
    let params: Vec<Value> = serde_json::from_str(params).context("--params must be a JSON array")?;

    let client = RpcClient::from_config(&config)?;
    let result = client
        .request(method, params, RequestOptions::default())
        .await
        .with_context(|| format!("{method} failed"))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_batch(endpoints: &Endpoints, methods: &[String], wait_ms: u64) -> Result<()> {
    let mut config = load_config(endpoints)?;
    config.batch = match config.batch {
        BatchSetting::Options { batch_size, .. } => BatchSetting::Options { wait_ms, batch_size },
        _ => BatchSetting::Options {
            wait_ms,
            batch_size: 1000,
        },
    };

    let client = RpcClient::from_config(&config)?;
    let start = Instant::now();
    let calls = methods
        .iter()
        .map(|m| client.request(m, vec![], RequestOptions::default()));
    let results = join_all(calls).await;
    let elapsed = start.elapsed();

    let mut failures = 0;
    for (method, result) in methods.iter().zip(results) {
        match result {
            Ok(value) => println!("  ✓ {method:24} {value}"),
            Err(e) => {
                failures += 1;
                println!("  ✗ {method:24} {e}");
            }
        }
    }
    println!("\n{} calls in {}ms", methods.len(), elapsed.as_millis());
    if failures > 0 {
        bail!("{failures} of {} calls failed", methods.len());
    }
    Ok(())
}

async fn cmd_rank(endpoints: &Endpoints, rounds: u32) -> Result<()> {
    let config = load_config(endpoints)?;
    let http_config = config.http_config();

    let mut transports: Vec<Arc<dyn RpcTransport>> = Vec::new();
    for url in config.endpoints() {
        transports.push(Arc::new(HttpTransport::new(url, http_config.clone())?));
    }

    let fallback = FallbackTransport::new(transports, config.fallback_config());

    for _ in 0..rounds.max(1) {
        fallback.sample_now().await;
    }

    println!("Ranking ({}):", fallback.rank_state());
    for (i, (url, score)) in fallback.ranking().into_iter().enumerate() {
        println!("  {}. {:50} score={:.3}", i + 1, url, score);
    }
    Ok(())
}

async fn cmd_test(url: &str) -> Result<()> {
    let http = Arc::new(HttpTransport::default_for(url)?);
    let client = RpcClient::new(http, Default::default());

    println!("Testing {url}...");

    let start = Instant::now();
    let block: String = client
        .call("eth_blockNumber", vec![])
        .await
        .context("eth_blockNumber failed")?;
    let latency = start.elapsed();

    let block_num = u64::from_str_radix(block.trim_start_matches("0x"), 16).unwrap_or(0);

    println!("  Status:       OK");
    println!("  Block number: {block_num} ({block})");
    println!("  Latency:      {}ms", latency.as_millis());
    Ok(())
}
