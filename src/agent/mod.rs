//! One independently-scheduled trading agent (spec §4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::error;

use crate::decision::DecisionModule;
use crate::market::MarketProvider;
use crate::models::{
    now_ms, AgentConfig, AgentState, AgentStatus, ConnectionMode, DecisionTrace, ExecutionStatus, TraceExecution,
    MAX_CONSECUTIVE_ERRORS,
};
use crate::runtime::events::LifecycleKind;
use crate::wallet::Wallet;

/// What an Agent reports to whoever is aggregating agents into a runtime
/// view. Carried over a shared broadcast channel so multiple agents can
/// fan into one listener without each one owning a callback list.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    StateChanged(AgentState),
    Lifecycle { agent_id: u64, kind: LifecycleKind, message: Option<String> },
}

/// Supplies the immutable peer-state view an agent sees on each tick —
/// never includes the requesting agent's own entry.
pub type PeerSupplier = Arc<dyn Fn() -> Vec<AgentState> + Send + Sync>;

struct AgentInner {
    state: AgentState,
    decision_module: Box<dyn DecisionModule>,
}

pub struct Agent {
    pub id: u64,
    config: RwLock<AgentConfig>,
    wallet: Arc<dyn Wallet>,
    market: Arc<dyn MarketProvider>,
    peer_supplier: PeerSupplier,
    inner: AsyncMutex<AgentInner>,
    owns_decision_module: bool,
    running: AtomicBool,
    schedule: SyncMutex<Option<JoinHandle<()>>>,
    cancel: Notify,
    events: broadcast::Sender<AgentEvent>,
}

impl Agent {
    pub fn new(
        id: u64,
        config: AgentConfig,
        address: String,
        wallet: Arc<dyn Wallet>,
        market: Arc<dyn MarketProvider>,
        peer_supplier: PeerSupplier,
        decision_module: Box<dyn DecisionModule>,
        owns_decision_module: bool,
        events: broadcast::Sender<AgentEvent>,
    ) -> Arc<Self> {
        let state = AgentState::new(id, config.name.clone(), config.strategy.clone(), address);
        Arc::new(Self {
            id,
            config: RwLock::new(config),
            wallet,
            market,
            peer_supplier,
            inner: AsyncMutex::new(AgentInner { state, decision_module }),
            owns_decision_module,
            running: AtomicBool::new(false),
            schedule: SyncMutex::new(None),
            cancel: Notify::new(),
            events,
        })
    }

    pub async fn snapshot(&self) -> AgentState {
        self.inner.lock().await.state.clone()
    }

    fn emit_state(&self, state: AgentState) {
        let _ = self.events.send(AgentEvent::StateChanged(state));
    }

    fn emit_lifecycle(&self, kind: LifecycleKind, message: Option<String>) {
        let _ = self.events.send(AgentEvent::Lifecycle { agent_id: self.id, kind, message });
    }

    /// Idempotent: a second call while a schedule already exists does
    /// nothing (same cadence, no duplicate timers).
    pub fn start(self: &Arc<Self>) {
        let mut schedule = self.schedule.lock();
        if schedule.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let interval_ms = self.config.read().interval_ms.max(1000);
        let agent = Arc::clone(self);
        let handle = tokio::spawn(async move {
            agent.tick().await;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                    _ = agent.cancel.notified() => break,
                }
                if !agent.running.load(Ordering::SeqCst) {
                    break;
                }
                agent.tick().await;
            }
        });
        *schedule = Some(handle);
        self.emit_lifecycle(LifecycleKind::Started, None);
    }

    /// Cancels the next scheduled tick without interrupting one already in
    /// flight — the in-flight tick holds `inner`'s lock and runs to
    /// completion regardless of this call.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) && self.schedule.lock().is_none() {
            return;
        }
        self.cancel.notify_one();
        let handle = self.schedule.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let mut inner = self.inner.lock().await;
        inner.state.status = AgentStatus::Stopped;
        inner.state.last_decision = None;
        inner.state.trace_history.clear();
        if self.owns_decision_module {
            inner.decision_module.reset();
        }
        let snapshot = inner.state.clone();
        drop(inner);
        self.emit_state(snapshot);
        self.emit_lifecycle(LifecycleKind::Stopped, None);
    }

    /// Replace the config in place. Per spec this never reschedules — the
    /// running ticker keeps its original cadence and simply reads the new
    /// rules/name/strategy on its next tick.
    pub async fn update_config(&self, new_config: AgentConfig) {
        *self.config.write() = new_config.clone();
        let mut inner = self.inner.lock().await;
        inner.decision_module.on_config_updated(&new_config);
        inner.state.name = new_config.name;
        inner.state.strategy = new_config.strategy;
    }

    pub async fn tick(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        inner.state.tick_count += 1;

        let balance = match self.wallet.get_balance(self.id).await {
            Ok(balance) => balance.sol,
            Err(err) => {
                self.fail_tick(&mut inner, err.to_string()).await;
                return;
            }
        };
        inner.state.balance = balance;

        let peers = (self.peer_supplier)();
        let market = self.market.current().await;
        let now = now_ms();

        let AgentInner { state, decision_module } = &mut *inner;
        let output = decision_module.evaluate(state, &market, &peers, now);

        let mut execution = None;
        if output.decision.action.is_actionable() {
            let amount = output.decision.amount.unwrap_or(0.0);
            let payload = format!("{:?}:{}:{}", output.decision.action, self.id, amount).to_lowercase();
            match self.wallet.sign_transaction(self.id, &payload).await {
                Ok(result) => {
                    inner.state.last_action = Some(format!("{:?} {amount}", output.decision.action).to_lowercase());
                    inner.state.last_action_timestamp = Some(now);
                    inner.state.last_trade_amount = amount;
                    if result.status == ExecutionStatus::Confirmed {
                        inner.state.consecutive_wins += 1;
                    }
                    execution = Some(TraceExecution {
                        status: result.status,
                        signature: Some(result.signature),
                        mode: result.mode,
                        error: None,
                    });
                }
                Err(err) => {
                    execution = Some(TraceExecution {
                        status: ExecutionStatus::Failed,
                        signature: None,
                        mode: ConnectionMode::Normal,
                        error: Some(err.to_string()),
                    });
                }
            }
            inner.state.status = AgentStatus::Active;
        } else {
            inner.state.status = AgentStatus::Cooldown;
        }

        inner.state.consecutive_errors = 0;
        inner.state.last_error = None;

        let trace = DecisionTrace {
            timestamp: now,
            agent_id: self.id,
            market_data: market,
            evaluations: output.evaluations,
            decision: output.decision,
            execution,
        };
        inner.state.push_trace(trace);

        let snapshot = inner.state.clone();
        drop(inner);
        self.emit_state(snapshot);
    }

    async fn fail_tick(self: &Arc<Self>, inner: &mut AgentInner, message: String) {
        inner.state.consecutive_errors += 1;
        inner.state.status = AgentStatus::Error;
        inner.state.last_error = Some(message.clone());
        error!(agent_id = self.id, error = %message, "agent tick failed");

        let auto_stop = inner.state.consecutive_errors >= MAX_CONSECUTIVE_ERRORS;
        if auto_stop {
            self.running.store(false, Ordering::SeqCst);
            // Can't `.await` this handle the way `stop()` does — we're
            // running inside the very task it points to. Taking it out of
            // the slot (and aborting it, a no-op since we're about to
            // return and let the loop see `running == false` anyway) is
            // enough to leave `start()`'s re-entry guard clear so the agent
            // can be restarted later.
            if let Some(handle) = self.schedule.lock().take() {
                handle.abort();
            }
            inner.state.status = AgentStatus::Stopped;
            inner.state.last_decision = None;
            inner.state.trace_history.clear();
            if self.owns_decision_module {
                inner.decision_module.reset();
            }
        }

        let snapshot = inner.state.clone();
        self.emit_state(snapshot);
        self.emit_lifecycle(LifecycleKind::Error, Some(message));
        if auto_stop {
            self.emit_lifecycle(LifecycleKind::AutoStopped, None);
        }
    }
}
