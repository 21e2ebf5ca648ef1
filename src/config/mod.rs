//! Process-wide configuration, read once at startup (spec §6).

pub mod schema;

use std::env;

use crate::rpc::RpcClientConfig;

/// The env-var snapshot taken at construction time. Per spec §9 this is the
/// only "global state" the process carries besides the Runtime and SSE hub.
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc: RpcClientConfig,
    pub port: u16,
    pub demo_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            rpc: RpcClientConfig { endpoints: rpc_endpoints(), ..RpcClientConfig::default() },
            port: env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(3000),
            demo_mode: env::var("DEMO_MODE")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
                .unwrap_or(true),
        }
    }
}

/// `RPC_ENDPOINTS` (comma-separated, whitespace-trimmed, blanks dropped)
/// wins over the single-endpoint `RPC_URL` fallback; absent both, the
/// RpcClient's own default endpoint applies.
fn rpc_endpoints() -> Vec<String> {
    if let Ok(raw) = env::var("RPC_ENDPOINTS") {
        let endpoints: Vec<String> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        if !endpoints.is_empty() {
            return endpoints;
        }
    }
    if let Ok(url) = env::var("RPC_URL") {
        let url = url.trim();
        if !url.is_empty() {
            return vec![url.to_string()];
        }
    }
    RpcClientConfig::default().endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn rpc_endpoints_prefers_endpoints_list_over_single_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("RPC_ENDPOINTS", " https://a.example , , https://b.example ");
        env::set_var("RPC_URL", "https://single.example");
        let endpoints = rpc_endpoints();
        assert_eq!(endpoints, vec!["https://a.example", "https://b.example"]);
        env::remove_var("RPC_ENDPOINTS");
        env::remove_var("RPC_URL");
    }

    #[test]
    fn rpc_endpoints_falls_back_to_single_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("RPC_ENDPOINTS");
        env::set_var("RPC_URL", "https://single.example");
        assert_eq!(rpc_endpoints(), vec!["https://single.example"]);
        env::remove_var("RPC_URL");
    }

    #[test]
    fn rpc_endpoints_defaults_when_both_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("RPC_ENDPOINTS");
        env::remove_var("RPC_URL");
        assert_eq!(rpc_endpoints(), RpcClientConfig::default().endpoints);
    }
}
