//! Runtime event taxonomy (spec §4.7, §4.10) and the payload shapes the SSE
//! layer forwards them as.

use serde::Serialize;

use crate::models::{now_ms, AgentState, MarketData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Started,
    Stopped,
    Error,
    AutoStopped,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::Started => "started",
            LifecycleKind::Stopped => "stopped",
            LifecycleKind::Error => "error",
            LifecycleKind::AutoStopped => "auto-stopped",
        }
    }
}

/// What the Agent/Runtime layer fans out. Every variant is stamped with a
/// dispatch timestamp only when it's forwarded to the SSE hub, never at
/// construction — this mirrors "events missing `timestamp` get one stamped
/// on arrival".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    StateUpdate { agents: Vec<AgentState> },
    AgentLifecycle { agent_id: u64, event: LifecycleKind, message: Option<String> },
    MarketUpdate { market: MarketData },
    SimulationMode { active: bool, reason: String },
    RulesReloaded { agent_id: Option<u64>, success: bool, file_name: Option<String>, error: Option<String> },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdatePayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: i64,
    pub agents: Vec<AgentState>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecyclePayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub agent_id: u64,
    pub event: &'static str,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotReloadPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketUpdatePayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub market_data: MarketData,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ModeChangePayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub active: bool,
    pub reason: String,
    pub timestamp: i64,
}

/// The hub event name and JSON payload a `RuntimeEvent` maps to, per the
/// `stateUpdate`/`systemEvent`/`marketUpdate`/`modeChange` wire contract.
pub fn to_hub_message(event: RuntimeEvent) -> (&'static str, serde_json::Value) {
    let timestamp = now_ms();
    match event {
        RuntimeEvent::StateUpdate { agents } => (
            "stateUpdate",
            serde_json::to_value(StateUpdatePayload { kind: "agentState", timestamp, agents }).unwrap(),
        ),
        RuntimeEvent::AgentLifecycle { agent_id, event, message } => (
            "systemEvent",
            serde_json::to_value(LifecyclePayload { kind: "lifecycle", agent_id, event: event.as_str(), timestamp, message })
                .unwrap(),
        ),
        RuntimeEvent::RulesReloaded { agent_id, success, file_name, error } => (
            "systemEvent",
            serde_json::to_value(HotReloadPayload { kind: "hotReload", agent_id, success, file_name, error, timestamp })
                .unwrap(),
        ),
        RuntimeEvent::MarketUpdate { market } => (
            "marketUpdate",
            serde_json::to_value(MarketUpdatePayload { kind: "market", market_data: market, timestamp }).unwrap(),
        ),
        RuntimeEvent::SimulationMode { active, reason } => (
            "modeChange",
            serde_json::to_value(ModeChangePayload { kind: "mode", active, reason, timestamp }).unwrap(),
        ),
    }
}
