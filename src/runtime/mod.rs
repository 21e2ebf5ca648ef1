//! Owns every Agent, mirrors their last-known state for peer visibility,
//! and multiplexes their events toward the SSE hub (spec §4.7).

pub mod events;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::info;

use crate::agent::{Agent, AgentEvent, PeerSupplier};
use crate::decision::{DecisionModule, RuleBasedDecisionModule};
use crate::market::MarketProvider;
use crate::models::{AgentConfig, AgentState};
use crate::rpc::RpcClient;
use crate::rules::DEFAULT_EXECUTION_THRESHOLD;
use crate::wallet::Wallet;

pub use events::{LifecycleKind, RuntimeEvent};

/// The shared, read-copy-update peer map: written only by the runtime's own
/// forwarder task, read by every agent's peer-state supplier as a
/// defensive snapshot.
type PeerMap = Arc<RwLock<HashMap<u64, AgentState>>>;

pub struct Runtime {
    agents: RwLock<Vec<Arc<Agent>>>,
    market: Arc<dyn MarketProvider>,
    peers: PeerMap,
    agent_events_tx: broadcast::Sender<AgentEvent>,
    runtime_events_tx: broadcast::Sender<RuntimeEvent>,
    forwarder: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(market: Arc<dyn MarketProvider>) -> Arc<Self> {
        let (agent_events_tx, agent_events_rx) = broadcast::channel(4096);
        let (runtime_events_tx, _) = broadcast::channel(4096);
        let runtime = Arc::new(Self {
            agents: RwLock::new(Vec::new()),
            market,
            peers: Arc::new(RwLock::new(HashMap::new())),
            agent_events_tx,
            runtime_events_tx,
            forwarder: std::sync::Mutex::new(None),
        });
        runtime.spawn_forwarder(agent_events_rx);
        runtime
    }

    /// Build an Agent wired up with this runtime's shared peer map, market
    /// provider, and event bus, and add it to the roster. Safe to call at
    /// any point in the runtime's lifetime, including after `start()` —
    /// the new agent just won't tick until its own `start()`/the next
    /// `Runtime::start()` call.
    pub fn add_agent(self: &Arc<Self>, id: u64, config: AgentConfig, address: String, wallet: Arc<dyn Wallet>) {
        let execution_threshold = DEFAULT_EXECUTION_THRESHOLD;
        let decision_module: Box<dyn DecisionModule> = Box::new(RuleBasedDecisionModule::new(config.rules.clone(), execution_threshold));
        let peers = Arc::clone(&self.peers);
        let peer_supplier: PeerSupplier = Arc::new(move || {
            let map = peers.read();
            let mut snapshot: Vec<AgentState> = map.values().filter(|s| s.agent_id != id).cloned().collect();
            snapshot.sort_by_key(|s| s.agent_id);
            snapshot
        });

        let agent = Agent::new(
            id,
            config,
            address,
            wallet,
            Arc::clone(&self.market),
            peer_supplier,
            decision_module,
            true,
            self.agent_events_tx.clone(),
        );

        self.agents.write().push(agent);
    }

    fn spawn_forwarder(self: &Arc<Self>, mut rx: broadcast::Receiver<AgentEvent>) {
        let runtime = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(AgentEvent::StateChanged(state)) => {
                        runtime.peers.write().insert(state.agent_id, state);
                        let agents = runtime.all_states_sorted();
                        let _ = runtime.runtime_events_tx.send(RuntimeEvent::StateUpdate { agents });
                    }
                    Ok(AgentEvent::Lifecycle { agent_id, kind, message }) => {
                        let _ = runtime.runtime_events_tx.send(RuntimeEvent::AgentLifecycle { agent_id, event: kind, message });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.forwarder.lock().unwrap() = Some(handle);
    }

    fn all_states_sorted(&self) -> Vec<AgentState> {
        let mut states: Vec<AgentState> = self.peers.read().values().cloned().collect();
        states.sort_by_key(|s| s.agent_id);
        states
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.runtime_events_tx.subscribe()
    }

    /// Bridge an `RpcClient`'s simulation-mode transitions onto this
    /// runtime's event bus as `modeChange` events. Every agent shares one
    /// `RpcClient` underneath its wallet, so the caller wires this once at
    /// startup rather than per agent.
    pub fn watch_rpc_client(self: &Arc<Self>, rpc: Arc<RpcClient>) -> tokio::task::JoinHandle<()> {
        let runtime = Arc::clone(self);
        let mut events = rpc.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let _ = runtime.runtime_events_tx.send(RuntimeEvent::SimulationMode {
                            active: event.active,
                            reason: event.reason,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn start(&self) {
        let agents = self.agents.read().clone();
        info!(agent_count = agents.len(), "starting runtime");
        for agent in &agents {
            agent.start();
        }
    }

    /// Stop one agent by id, or every agent when `agent_id` is `None`.
    /// Stopping an already-stopped agent is a no-op (the Agent's own
    /// `stop()` guards against a duplicate lifecycle event).
    pub async fn stop(&self, agent_id: Option<u64>) {
        let agents = self.agents.read().clone();
        match agent_id {
            Some(id) => {
                if let Some(agent) = agents.iter().find(|a| a.id == id) {
                    agent.stop().await;
                }
            }
            None => {
                for agent in &agents {
                    agent.stop().await;
                }
            }
        }
    }

    /// Frozen snapshots of every agent in insertion (agent-id) order.
    pub async fn get_states(&self) -> Vec<AgentState> {
        let agents = self.agents.read().clone();
        let mut states = Vec::with_capacity(agents.len());
        for agent in &agents {
            states.push(agent.snapshot().await);
        }
        states.sort_by_key(|s| s.agent_id);
        states
    }

    pub async fn inject_dip(&self, percent: f64) {
        self.market.inject_dip(percent).await;
        let market = self.market.current().await;
        let _ = self.runtime_events_tx.send(RuntimeEvent::MarketUpdate { market });
    }

    pub async fn inject_rally(&self, percent: f64) {
        self.market.inject_rally(percent).await;
        let market = self.market.current().await;
        let _ = self.runtime_events_tx.send(RuntimeEvent::MarketUpdate { market });
    }

    pub async fn reset_market(&self) {
        self.market.reset().await;
        let market = self.market.current().await;
        let _ = self.runtime_events_tx.send(RuntimeEvent::MarketUpdate { market });
    }

    pub async fn update_agent_config(&self, agent_id: u64, config: AgentConfig) -> bool {
        let agent = self.agents.read().iter().find(|a| a.id == agent_id).cloned();
        if let Some(agent) = agent {
            agent.update_config(config).await;
            let _ = self.runtime_events_tx.send(RuntimeEvent::RulesReloaded {
                agent_id: Some(agent_id),
                success: true,
                file_name: None,
                error: None,
            });
            true
        } else {
            let _ = self.runtime_events_tx.send(RuntimeEvent::RulesReloaded {
                agent_id: Some(agent_id),
                success: false,
                file_name: None,
                error: Some(format!("no agent with id {agent_id}")),
            });
            false
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.lock().unwrap().take() {
            handle.abort();
        }
    }
}
