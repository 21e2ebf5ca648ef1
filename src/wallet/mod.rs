//! Simulated wallet adapter (spec §4.9).
//!
//! No real key material is ever generated or held. Addresses are
//! deterministic derived strings suitable for a demo ledger. Balances are
//! tracked on a local in-memory ledger (this is a closed multi-agent
//! economy, not a real chain), but every transfer is still routed through
//! the `RpcClient` to pick up a blockhash, a signature, and a connection
//! mode the same way a live wallet would.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::{Balance, ExecutionStatus, TransactionResult};
use crate::rpc::{RpcClient, TransactionSource};

/// Agent id reserved for the treasury that funds every other agent.
pub const TREASURY_AGENT_ID: u64 = 0;

/// A single simulated keypair: a stable fake address. Nothing here ever
/// leaves the process or touches disk.
#[derive(Debug, Clone)]
pub struct AgentWallet {
    pub agent_id: u64,
    pub address: String,
}

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn get_agent(&self, agent_id: u64) -> Result<AgentWallet>;
    async fn get_address(&self, agent_id: u64) -> Result<String>;
    async fn get_balance(&self, agent_id: u64) -> Result<Balance>;
    async fn sign_transaction(&self, agent_id: u64, payload: &str) -> Result<TransactionResult>;
    async fn distribute_sol(&self, to_agent_id: u64, amount_sol: f64) -> Result<TransactionResult>;
    async fn request_airdrop(&self, agent_id: u64, amount_sol: f64) -> Result<String>;
}

fn derive_address(agent_id: u64) -> String {
    let seed = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("autarch-agent-{agent_id}").as_bytes());
    hex::encode(seed.as_bytes())
}

/// A demo wallet backed by an in-memory ledger plus a real `RpcClient` for
/// the blockhash/submit/airdrop plumbing. Agent 0 is the treasury and
/// starts funded; every other agent starts at zero until the treasury (or
/// an airdrop) funds it.
pub struct SimulatedWallet {
    rpc: Arc<RpcClient>,
    balances: Mutex<HashMap<u64, u64>>, // lamports
}

impl SimulatedWallet {
    pub fn new(rpc: Arc<RpcClient>, treasury_lamports: u64) -> Self {
        let mut balances = HashMap::new();
        balances.insert(TREASURY_AGENT_ID, treasury_lamports);
        Self { rpc, balances: Mutex::new(balances) }
    }

    fn transfer_payload(&self, from: u64, to: u64, lamports: u64) -> String {
        format!("transfer:{from}:{to}:{lamports}")
    }
}

#[async_trait]
impl Wallet for SimulatedWallet {
    async fn get_agent(&self, agent_id: u64) -> Result<AgentWallet> {
        Ok(AgentWallet { agent_id, address: derive_address(agent_id) })
    }

    async fn get_address(&self, agent_id: u64) -> Result<String> {
        Ok(derive_address(agent_id))
    }

    async fn get_balance(&self, agent_id: u64) -> Result<Balance> {
        let lamports = *self.balances.lock().get(&agent_id).unwrap_or(&0);
        Ok(Balance::from_lamports(lamports))
    }

    async fn sign_transaction(&self, agent_id: u64, payload: &str) -> Result<TransactionResult> {
        let _ = self.rpc.get_latest_blockhash().await;
        let payload = payload.to_string();
        let result = self
            .rpc
            .send_and_confirm(TransactionSource::PreSigned(payload))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to submit transaction for agentId {agent_id} — {e}"))?;
        Ok(result)
    }

    async fn distribute_sol(&self, to_agent_id: u64, amount_sol: f64) -> Result<TransactionResult> {
        if to_agent_id == TREASURY_AGENT_ID {
            bail!("Cannot distribute SOL to the treasury agent itself");
        }
        if amount_sol <= 0.0 {
            bail!("Distribution amount must be positive");
        }
        let lamports = (amount_sol * Balance::LAMPORTS_PER_SOL as f64) as u64;
        {
            let mut balances = self.balances.lock();
            let treasury = *balances.get(&TREASURY_AGENT_ID).unwrap_or(&0);
            if treasury < lamports {
                bail!("Treasury has insufficient balance to distribute {amount_sol} SOL to agentId {to_agent_id}");
            }
        }

        let _ = self.rpc.get_latest_blockhash().await;
        let payload = self.transfer_payload(TREASURY_AGENT_ID, to_agent_id, lamports);
        let result = self
            .rpc
            .send_and_confirm(TransactionSource::PreSigned(payload))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to distribute SOL to agentId {to_agent_id} — {e}"))?;

        if result.status != ExecutionStatus::Failed {
            let mut balances = self.balances.lock();
            *balances.entry(TREASURY_AGENT_ID).or_insert(0) -= lamports;
            *balances.entry(to_agent_id).or_insert(0) += lamports;
        }
        Ok(result)
    }

    async fn request_airdrop(&self, agent_id: u64, amount_sol: f64) -> Result<String> {
        if amount_sol <= 0.0 {
            bail!("Airdrop amount must be positive");
        }
        let address = derive_address(agent_id);
        let signature = self
            .rpc
            .request_airdrop(&address, amount_sol)
            .await
            .map_err(|e| anyhow::anyhow!("Airdrop request failed for agentId {agent_id} — {e}"))?;
        let lamports = (amount_sol * Balance::LAMPORTS_PER_SOL as f64) as u64;
        *self.balances.lock().entry(agent_id).or_insert(0) += lamports;
        Ok(signature)
    }
}
