//! RPC resilience state machine (spec §4.8): retry with capped exponential
//! backoff, endpoint rotation, and a three-state connection mode that falls
//! back to synthesized responses once connectivity is presumed lost.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use reqwest::Client as HttpClient;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Balance, ConnectionMode, ExecutionStatus, TransactionResult};

use super::error::RpcError;

const SIMULATION_FAILURE_THRESHOLD: u32 = 3;
const RECOVERY_BUDGET_MS: u64 = 5_000;
const SIMULATED_BLOCKHASH: &str = "11111111111111111111111111111111";

#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub endpoints: Vec<String>,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub health_check_interval_ms: u64,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["https://api.devnet.solana.com".to_string()],
            max_retries: 3,
            base_delay_ms: 1_000,
            health_check_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Blockhash {
    pub blockhash: String,
    pub last_valid_block_height: u64,
}

/// Something `sendAndConfirm` can turn into a signed transaction payload.
/// A factory is re-invoked on every retry attempt so a stale blockhash
/// never gets resubmitted.
#[derive(Clone)]
pub enum TransactionSource {
    PreSigned(String),
    Factory(Arc<dyn Fn() -> BoxFuture<'static, Result<String, RpcError>> + Send + Sync>),
}

impl TransactionSource {
    async fn resolve(&self) -> Result<String, RpcError> {
        match self {
            TransactionSource::PreSigned(tx) => Ok(tx.clone()),
            TransactionSource::Factory(f) => f().await,
        }
    }
}

/// Fired whenever the connection mode transitions visibly (spec:
/// `onSimulationModeChange` plus the `simulationMode` runtime event).
#[derive(Debug, Clone)]
pub struct SimulationModeEvent {
    pub active: bool,
    pub reason: String,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum OpKind {
    Read,
    Write,
    Airdrop,
}

enum RetryOutcome<T> {
    Success(T),
    EnteredSimulation,
}

pub struct RpcClient {
    config: RpcClientConfig,
    http: HttpClient,
    mode: RwLock<ConnectionMode>,
    consecutive_network_failures: AtomicU32,
    endpoint_index: AtomicUsize,
    balance_cache: Mutex<std::collections::HashMap<String, Balance>>,
    health_probe: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SimulationModeEvent>,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            config,
            http: HttpClient::new(),
            mode: RwLock::new(ConnectionMode::Normal),
            consecutive_network_failures: AtomicU32::new(0),
            endpoint_index: AtomicUsize::new(0),
            balance_cache: Mutex::new(std::collections::HashMap::new()),
            health_probe: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimulationModeEvent> {
        self.events.subscribe()
    }

    pub fn mode(&self) -> ConnectionMode {
        *self.mode.read()
    }

    fn primary_endpoint(&self) -> &str {
        &self.config.endpoints[0]
    }

    fn current_endpoint(&self) -> String {
        let idx = self.endpoint_index.load(Ordering::SeqCst) % self.config.endpoints.len();
        self.config.endpoints[idx].clone()
    }

    fn rotate_endpoint(&self) {
        if self.config.endpoints.len() <= 1 {
            return;
        }
        self.endpoint_index.fetch_add(1, Ordering::SeqCst);
    }

    fn on_success(&self, endpoint: &str) {
        self.consecutive_network_failures.store(0, Ordering::SeqCst);
        let is_primary = endpoint == self.primary_endpoint();
        let mut mode = self.mode.write();
        match (*mode, is_primary) {
            (ConnectionMode::Degraded, true) => *mode = ConnectionMode::Normal,
            (ConnectionMode::Simulation, true) => *mode = ConnectionMode::Normal,
            (ConnectionMode::Normal, false) => *mode = ConnectionMode::Degraded,
            _ => {}
        }
    }

    async fn enter_simulation(self: &Arc<Self>, failure_count: u32) {
        {
            let mut mode = self.mode.write();
            if *mode == ConnectionMode::Simulation {
                return;
            }
            *mode = ConnectionMode::Simulation;
        }
        let reason = format!("{failure_count} consecutive network failures");
        warn!(reason = %reason, "entering simulation mode");
        let _ = self.events.send(SimulationModeEvent { active: true, reason });
        self.spawn_health_probe();
    }

    fn spawn_health_probe(self: &Arc<Self>) {
        let mut slot = self.health_probe.lock();
        if slot.is_some() {
            return;
        }
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(client.config.health_check_interval_ms)).await;
                match client.get_health(client.primary_endpoint()).await {
                    Ok(()) => {
                        client.consecutive_network_failures.store(0, Ordering::SeqCst);
                        *client.mode.write() = ConnectionMode::Normal;
                        info!("health check succeeded, leaving simulation mode");
                        let _ = client.events.send(SimulationModeEvent {
                            active: false,
                            reason: "Health check succeeded".to_string(),
                        });
                        *client.health_probe.lock() = None;
                        return;
                    }
                    Err(_) => continue,
                }
            }
        });
        *slot = Some(handle);
    }

    /// Cancel the health probe task if one is running. Safe to call more
    /// than once.
    pub fn cleanup(&self) {
        if let Some(handle) = self.health_probe.lock().take() {
            handle.abort();
        }
    }

    async fn get_health(&self, endpoint: &str) -> Result<(), RpcError> {
        self.call_json_rpc(endpoint, "getHealth", json!([])).await.map(|_| ())
    }

    async fn call_json_rpc(&self, endpoint: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::classify(&e.to_string(), e.status().map(|s| s.as_u16())))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(RpcError::RateLimit(format!("HTTP 429 from {endpoint}")));
        }
        if !status.is_success() {
            return Err(RpcError::classify(&format!("HTTP {status} from {endpoint}"), Some(status.as_u16())));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RpcError::Request(format!("invalid response body: {e}")))?;

        if let Some(error) = payload.get("error") {
            let message = error.get("message").and_then(|m| m.as_str()).unwrap_or("rpc error");
            return Err(RpcError::classify(message, None));
        }

        Ok(payload.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn with_retry<T, F, Fut>(self: &Arc<Self>, op_kind: OpKind, mut call: F) -> Result<RetryOutcome<T>, RpcError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut cumulative_sleep_ms: u64 = 0;
        let mut last_err: Option<RpcError> = None;

        // `max_retries` counts retries *beyond* the first attempt, so a
        // client configured with `max_retries = 0` still makes one attempt
        // per call (this is what lets scenario 6's "three consecutive
        // ECONNREFUSED" accumulate across three separate calls).
        for attempt in 0..=self.config.max_retries {
            let endpoint = self.current_endpoint();
            match call(endpoint.clone()).await {
                Ok(value) => {
                    self.on_success(&endpoint);
                    return Ok(RetryOutcome::Success(value));
                }
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    let is_rate_limit = matches!(err, RpcError::RateLimit(_));
                    let counts_toward_simulation = !(op_kind == OpKind::Airdrop && is_rate_limit);
                    if counts_toward_simulation {
                        let failures = self.consecutive_network_failures.fetch_add(1, Ordering::SeqCst) + 1;
                        if failures >= SIMULATION_FAILURE_THRESHOLD {
                            self.enter_simulation(failures).await;
                            return Ok(RetryOutcome::EnteredSimulation);
                        }
                    }
                    self.rotate_endpoint();

                    let mut delay_ms = self.config.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
                    if is_rate_limit {
                        delay_ms = delay_ms.saturating_mul(2);
                    }
                    let remaining_budget = RECOVERY_BUDGET_MS.saturating_sub(cumulative_sleep_ms);
                    let sleep_ms = delay_ms.min(remaining_budget);
                    if sleep_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                        cumulative_sleep_ms += sleep_ms;
                    }
                    last_err = Some(err);
                }
            }
        }

        let exhausted = last_err.unwrap_or_else(|| RpcError::Network("retrying exhausted".to_string()));
        if op_kind == OpKind::Airdrop && matches!(exhausted, RpcError::RateLimit(_)) {
            Err(RpcError::AirdropRateLimited(format!("retrying exhausted: {exhausted}")))
        } else {
            Err(RpcError::Network(format!("retrying exhausted: {exhausted}")))
        }
    }

    pub async fn get_balance(self: &Arc<Self>, address: &str) -> Result<Balance, RpcError> {
        if self.mode() == ConnectionMode::Simulation {
            return Ok(self.cached_balance(address));
        }

        let addr = address.to_string();
        let outcome = self
            .with_retry(OpKind::Read, |endpoint| {
                let addr = addr.clone();
                async move { self.fetch_balance(&endpoint, &addr).await }
            })
            .await;

        match outcome {
            Ok(RetryOutcome::Success(balance)) => {
                self.balance_cache.lock().insert(address.to_string(), balance);
                Ok(balance)
            }
            Ok(RetryOutcome::EnteredSimulation) => Ok(self.cached_balance(address)),
            Err(e) => Err(e),
        }
    }

    fn cached_balance(&self, address: &str) -> Balance {
        self.balance_cache.lock().get(address).copied().unwrap_or_else(Balance::zero)
    }

    async fn fetch_balance(&self, endpoint: &str, address: &str) -> Result<Balance, RpcError> {
        let result = self.call_json_rpc(endpoint, "getBalance", json!([address])).await?;
        let lamports = result
            .get("value")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::Request("malformed getBalance response".to_string()))?;
        Ok(Balance::from_lamports(lamports))
    }

    pub async fn get_latest_blockhash(self: &Arc<Self>) -> Result<Blockhash, RpcError> {
        if self.mode() == ConnectionMode::Simulation {
            return Ok(Blockhash { blockhash: SIMULATED_BLOCKHASH.to_string(), last_valid_block_height: 0 });
        }

        let outcome = self
            .with_retry(OpKind::Read, |endpoint| async move { self.fetch_blockhash(&endpoint).await })
            .await;

        match outcome {
            Ok(RetryOutcome::Success(hash)) => Ok(hash),
            Ok(RetryOutcome::EnteredSimulation) => {
                Ok(Blockhash { blockhash: SIMULATED_BLOCKHASH.to_string(), last_valid_block_height: 0 })
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_blockhash(&self, endpoint: &str) -> Result<Blockhash, RpcError> {
        let result = self.call_json_rpc(endpoint, "getLatestBlockhash", json!([])).await?;
        let value = result.get("value").ok_or_else(|| RpcError::Request("malformed blockhash response".to_string()))?;
        let blockhash = value
            .get("blockhash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::Request("malformed blockhash response".to_string()))?
            .to_string();
        let last_valid_block_height = value.get("lastValidBlockHeight").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(Blockhash { blockhash, last_valid_block_height })
    }

    pub async fn send_and_confirm(self: &Arc<Self>, source: TransactionSource) -> Result<TransactionResult, RpcError> {
        if self.mode() == ConnectionMode::Simulation {
            return Ok(simulated_transaction_result());
        }

        let outcome = self
            .with_retry(OpKind::Write, |endpoint| {
                let source = source.clone();
                async move {
                    let signed_tx = source.resolve().await?;
                    self.submit_transaction(&endpoint, &signed_tx).await
                }
            })
            .await;

        match outcome {
            Ok(RetryOutcome::Success(result)) => Ok(result),
            Ok(RetryOutcome::EnteredSimulation) => Ok(simulated_transaction_result()),
            Err(e) => Err(e),
        }
    }

    async fn submit_transaction(&self, endpoint: &str, signed_tx: &str) -> Result<TransactionResult, RpcError> {
        let result = self.call_json_rpc(endpoint, "sendTransaction", json!([signed_tx])).await?;
        let signature = result
            .as_str()
            .ok_or_else(|| RpcError::Request("malformed sendTransaction response".to_string()))?
            .to_string();
        Ok(TransactionResult { signature, status: ExecutionStatus::Confirmed, mode: self.mode() })
    }

    pub async fn request_airdrop(self: &Arc<Self>, address: &str, amount_sol: f64) -> Result<String, RpcError> {
        if self.mode() == ConnectionMode::Simulation {
            return Ok(simulated_signature());
        }

        let lamports = (amount_sol * Balance::LAMPORTS_PER_SOL as f64) as u64;
        let addr = address.to_string();
        let outcome = self
            .with_retry(OpKind::Airdrop, |endpoint| {
                let addr = addr.clone();
                async move { self.submit_airdrop(&endpoint, &addr, lamports).await }
            })
            .await;

        match outcome {
            Ok(RetryOutcome::Success(sig)) => Ok(sig),
            Ok(RetryOutcome::EnteredSimulation) => Ok(simulated_signature()),
            Err(e) => Err(e),
        }
    }

    async fn submit_airdrop(&self, endpoint: &str, address: &str, lamports: u64) -> Result<String, RpcError> {
        let result = self.call_json_rpc(endpoint, "requestAirdrop", json!([address, lamports])).await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| RpcError::Request("malformed requestAirdrop response".to_string()))
    }
}

fn simulated_signature() -> String {
    format!("sim-{}", Uuid::new_v4())
}

fn simulated_transaction_result() -> TransactionResult {
    TransactionResult { signature: simulated_signature(), status: ExecutionStatus::Simulated, mode: ConnectionMode::Simulation }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoints: Vec<&str>, max_retries: u32) -> RpcClientConfig {
        RpcClientConfig {
            endpoints: endpoints.into_iter().map(String::from).collect(),
            max_retries,
            base_delay_ms: 1,
            health_check_interval_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn simulation_entry_returns_cached_zero_balance() {
        let client = RpcClient::new(config(vec!["http://127.0.0.1:1"], 1));
        for _ in 0..SIMULATION_FAILURE_THRESHOLD {
            let _ = client.get_balance("some-address").await;
        }
        assert_eq!(client.mode(), ConnectionMode::Simulation);
        let balance = client.get_balance("some-address").await.unwrap();
        assert_eq!(balance.lamports, 0);
    }

    #[tokio::test]
    async fn simulation_mode_synthesizes_blockhash_and_signature() {
        let client = RpcClient::new(config(vec!["http://127.0.0.1:1"], 1));
        for _ in 0..SIMULATION_FAILURE_THRESHOLD {
            let _ = client.get_balance("x").await;
        }
        let hash = client.get_latest_blockhash().await.unwrap();
        assert_eq!(hash.blockhash, SIMULATED_BLOCKHASH);

        let tx = client.send_and_confirm(TransactionSource::PreSigned("tx".into())).await.unwrap();
        assert!(tx.signature.starts_with("sim-"));
        assert_eq!(tx.status, ExecutionStatus::Simulated);
        assert_eq!(tx.mode, ConnectionMode::Simulation);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let client = RpcClient::new(config(vec!["http://127.0.0.1:1"], 1));
        client.cleanup();
        client.cleanup();
    }
}
