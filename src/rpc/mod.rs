//! RPC resilience layer: error classification plus the retrying,
//! mode-switching client every blockchain call goes through.

pub mod client;
pub mod error;

pub use client::{Blockhash, RpcClient, RpcClientConfig, SimulationModeEvent, TransactionSource};
pub use error::RpcError;
