//! Autarch — multi-agent autonomous trading runtime.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autarch::config::schema::parse_agent_config;
use autarch::config::Config;
use autarch::http::{build_router, spawn_hub_forwarder, AppState};
use autarch::market::SimulatedMarketProvider;
use autarch::models::{AgentConfig, Balance};
use autarch::rpc::RpcClient;
use autarch::runtime::Runtime;
use autarch::sse::SseHub;
use autarch::wallet::{SimulatedWallet, Wallet};

/// Starting treasury balance when no real funding source is configured —
/// this is a closed demo economy, not a real chain (see `wallet::SimulatedWallet`).
const DEFAULT_TREASURY_SOL: f64 = 1_000.0;

/// How much the treasury seeds each demo agent with at startup.
const DEFAULT_AGENT_FUNDING_SOL: f64 = 10.0;

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("autarch runtime starting");

    let config = Config::from_env();
    let rpc = RpcClient::new(config.rpc.clone());
    let wallet: Arc<dyn Wallet> = Arc::new(SimulatedWallet::new(
        Arc::clone(&rpc),
        (DEFAULT_TREASURY_SOL * Balance::LAMPORTS_PER_SOL as f64) as u64,
    ));
    let market = Arc::new(SimulatedMarketProvider::default());
    spawn_market_walk(Arc::clone(&market));

    let agent_configs = load_agent_configs(config.demo_mode)?;
    info!(count = agent_configs.len(), "loaded agent configs");

    let runtime = Runtime::new(market.clone());
    runtime.watch_rpc_client(Arc::clone(&rpc));
    for (id, agent_config) in (1u64..).zip(agent_configs) {
        let address = wallet.get_address(id).await.context("failed to derive agent address")?;
        if let Err(e) = wallet.distribute_sol(id, DEFAULT_AGENT_FUNDING_SOL).await {
            warn!(agent_id = id, error = %e, "initial treasury funding failed");
        }
        runtime.add_agent(id, agent_config, address, Arc::clone(&wallet));
    }

    let hub = Arc::new(SseHub::default());
    spawn_hub_forwarder(Arc::clone(&runtime), Arc::clone(&hub));

    runtime.start();

    let app = build_router(AppState { runtime: Arc::clone(&runtime), hub });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "autarch listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(runtime))
        .await
        .context("server error")?;

    Ok(())
}

/// Advances the random walk independently of any agent's own tick cadence
/// (market/mod.rs: "Called by the runtime's own interval").
const MARKET_STEP_INTERVAL_MS: u64 = 5_000;

fn spawn_market_walk(market: Arc<SimulatedMarketProvider>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(MARKET_STEP_INTERVAL_MS));
        loop {
            ticker.tick().await;
            market.step();
        }
    })
}

async fn shutdown_signal(runtime: Arc<Runtime>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, stopping agents");
    runtime.stop(None).await;
}

/// Load every `*.json` file under `AGENT_CONFIG_DIR` (default
/// `configs/agents`), sorted by file name for deterministic agent ids. Falls
/// back to three built-in demo agents when the directory is absent/empty and
/// `DEMO_MODE` is enabled, so the binary runs out of the box.
fn load_agent_configs(demo_mode: bool) -> Result<Vec<AgentConfig>> {
    let dir = env::var("AGENT_CONFIG_DIR").unwrap_or_else(|_| "configs/agents".to_string());
    let dir = PathBuf::from(dir);

    let mut files: Vec<PathBuf> = match std::fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();

    if files.is_empty() {
        if demo_mode {
            info!(dir = %dir.display(), "no agent config files found, using built-in demo agents");
            return Ok(demo_agent_configs());
        }
        anyhow::bail!("no agent config files found under {} and DEMO_MODE is disabled", dir.display());
    }

    files.iter().map(|path| load_one_config(path)).collect()
}

fn load_one_config(path: &Path) -> Result<AgentConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_agent_config(&raw).with_context(|| format!("{} failed validation", path.display()))
}

fn demo_agent_configs() -> Vec<AgentConfig> {
    serde_json::from_value(serde_json::json!([
        {
            "name": "Alpha",
            "strategy": "dip-buyer",
            "intervalMs": 15000,
            "rules": [{
                "name": "buy-the-dip",
                "conditions": [{"field": "price_drop", "operator": ">", "threshold": 3}],
                "action": "buy",
                "amount": 0.25,
                "weight": 80,
                "cooldownSeconds": 60
            }]
        },
        {
            "name": "Beta",
            "strategy": "momentum",
            "intervalMs": 15000,
            "rules": [{
                "name": "ride-the-rally",
                "conditions": [{"field": "price_rise", "operator": ">", "threshold": 3}],
                "action": "buy",
                "amount": 0.15,
                "weight": 60,
                "cooldownSeconds": 45
            }]
        },
        {
            "name": "Gamma",
            "strategy": "profit-taker",
            "intervalMs": 15000,
            "rules": [{
                "name": "take-profit",
                "conditions": [{"field": "consecutive_wins", "operator": ">=", "threshold": 3}],
                "action": "sell",
                "amount": 0.2,
                "weight": 75,
                "cooldownSeconds": 120
            }]
        }
    ]))
    .expect("built-in demo configs are statically valid")
}

fn load_env() {
    let _ = dotenv();
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];
    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "autarch=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
