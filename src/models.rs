//! Core data model shared by the rule engine, agent runtime, and SSE hub.
//!
//! Every type here that crosses a component boundary (`AgentState`,
//! `DecisionTrace`, `MarketData`) is plain-old-data: cheap to `Clone`, and
//! never mutated in place once handed to a caller. Components that need to
//! mutate state do so on their own owned copy and publish a fresh snapshot.

use std::collections::VecDeque;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Bound on `AgentState::trace_history` (spec: `MAX_TRACE_HISTORY`).
pub const MAX_TRACE_HISTORY: usize = 100;

/// Consecutive tick failures before an agent auto-stops.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSource {
    Live,
    Simulated,
}

/// An immutable market snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub price: f64,
    pub price_change_1m: f64,
    pub price_change_5m: f64,
    pub volume_change_1m: f64,
    pub timestamp: i64,
    pub source: MarketSource,
}

impl MarketData {
    pub fn simulated(price: f64, price_change_1m: f64, price_change_5m: f64, volume_change_1m: f64) -> Self {
        Self {
            price,
            price_change_1m,
            price_change_5m,
            volume_change_1m,
            timestamp: now_ms(),
            source: MarketSource::Simulated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }

    pub fn all() -> &'static [Operator] {
        &[
            Operator::Gt,
            Operator::Lt,
            Operator::Ge,
            Operator::Le,
            Operator::Eq,
            Operator::Ne,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    Or,
    Not,
}

impl Default for Logic {
    fn default() -> Self {
        Logic::And
    }
}

impl Logic {
    pub fn all() -> &'static [Logic] {
        &[Logic::And, Logic::Or, Logic::Not]
    }
}

/// Either side of a comparison: a condition's `actual`/`threshold`, which may
/// be numeric or a string depending on the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.parse::<f64>().ok(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub threshold: FieldValue,
    #[serde(default)]
    pub logic: Logic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    Transfer,
    None,
}

impl Action {
    pub fn is_actionable(&self) -> bool {
        matches!(self, Action::Buy | Action::Sell | Action::Transfer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Rule {
    pub name: String,
    pub conditions: Vec<Condition>,
    pub action: Action,
    pub amount: f64,
    pub weight: i64,
    pub cooldown_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentConfig {
    pub name: String,
    pub strategy: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    pub rules: Vec<Rule>,
}

pub fn default_interval_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Active,
    Cooldown,
    Error,
    Stopped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Active => "active",
            AgentStatus::Cooldown => "cooldown",
            AgentStatus::Error => "error",
            AgentStatus::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownState {
    Active,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    InsufficientBalance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionResult {
    pub field: String,
    pub operator: Operator,
    pub threshold: FieldValue,
    pub actual: FieldValue,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_data_stale: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluation {
    pub rule_index: usize,
    pub rule_name: String,
    pub conditions: Vec<ConditionResult>,
    pub matched: bool,
    pub score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<CooldownState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<BlockReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResult {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    pub score: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Confirmed,
    Simulated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Normal,
    Degraded,
    Simulation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceExecution {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub mode: ConnectionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A frozen, per-tick record of every rule's evaluation plus the final
/// action and (if executed) its transaction outcome. Once appended to an
/// `AgentState::trace_history` this value is never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionTrace {
    pub timestamp: i64,
    pub agent_id: u64,
    pub market_data: MarketData,
    pub evaluations: Vec<RuleEvaluation>,
    pub decision: DecisionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<TraceExecution>,
}

/// A deep-immutable snapshot of one agent, as observed by the runtime, its
/// siblings, and the SSE dashboard. Produced fresh after every mutation —
/// never handed out as a mutable reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub agent_id: u64,
    pub name: String,
    pub strategy: String,
    pub status: AgentStatus,
    pub address: String,
    pub balance: f64,
    pub last_action: Option<String>,
    pub last_action_timestamp: Option<i64>,
    pub consecutive_errors: u32,
    pub tick_count: u64,
    pub last_error: Option<String>,
    pub position_size: f64,
    pub consecutive_wins: u32,
    pub last_trade_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_decision: Option<DecisionTrace>,
    pub trace_history: VecDeque<DecisionTrace>,
}

impl AgentState {
    pub fn new(agent_id: u64, name: String, strategy: String, address: String) -> Self {
        Self {
            agent_id,
            name,
            strategy,
            status: AgentStatus::Idle,
            address,
            balance: 0.0,
            last_action: None,
            last_action_timestamp: None,
            consecutive_errors: 0,
            tick_count: 0,
            last_error: None,
            position_size: 0.0,
            consecutive_wins: 0,
            last_trade_amount: 0.0,
            last_decision: None,
            trace_history: VecDeque::new(),
        }
    }

    pub fn push_trace(&mut self, trace: DecisionTrace) {
        if self.trace_history.len() >= MAX_TRACE_HISTORY {
            self.trace_history.pop_front();
        }
        self.last_decision = Some(trace.clone());
        self.trace_history.push_back(trace);
    }

    /// The leading verb of `last_action`, or `"none"` if absent or the
    /// action string itself begins with `"none"`. Used both for the
    /// `last_trade_result` self field and the `peer.<x>.last_action` field.
    pub fn last_trade_result(&self) -> String {
        match &self.last_action {
            None => "none".to_string(),
            Some(action) => {
                let trimmed = action.trim();
                if trimmed.to_lowercase().starts_with("none") {
                    return "none".to_string();
                }
                trimmed
                    .split_whitespace()
                    .next()
                    .unwrap_or("none")
                    .to_lowercase()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balance {
    pub lamports: u64,
    pub sol: f64,
}

impl Balance {
    pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

    pub fn from_lamports(lamports: u64) -> Self {
        Self {
            lamports,
            sol: lamports as f64 / Self::LAMPORTS_PER_SOL as f64,
        }
    }

    pub fn zero() -> Self {
        Self { lamports: 0, sol: 0.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub signature: String,
    pub status: ExecutionStatus,
    pub mode: ConnectionMode,
}
