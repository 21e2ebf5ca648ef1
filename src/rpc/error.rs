//! RPC error classification (spec §4.8).
//!
//! Network and rate-limit errors are retryable and count toward simulation
//! entry; transaction and request errors are not and surface unchanged.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    Network(String),
    RateLimit(String),
    Transaction(String),
    Request(String),
    AirdropRateLimited(String),
}

impl RpcError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Network(_) | RpcError::RateLimit(_))
    }

    /// Classify a raw transport/HTTP failure string into one of the
    /// retryable kinds, or a chain-level rejection into `Transaction`.
    pub fn classify(message: &str, http_status: Option<u16>) -> RpcError {
        if http_status == Some(429) {
            return RpcError::RateLimit(message.to_string());
        }
        let lower = message.to_lowercase();
        if lower.contains("econnrefused")
            || lower.contains("etimedout")
            || lower.contains("fetch failed")
            || lower.contains("connection refused")
            || lower.contains("timed out")
            || lower.contains("error sending request")
        {
            return RpcError::Network(message.to_string());
        }
        if lower.contains("insufficient funds") || lower.contains("program error") {
            return RpcError::Transaction(message.to_string());
        }
        RpcError::Request(message.to_string())
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Network(msg) => write!(f, "[RPC_NETWORK_ERROR] {msg}"),
            RpcError::RateLimit(msg) => write!(f, "[RPC_NETWORK_ERROR] {msg}"),
            RpcError::Transaction(msg) => write!(f, "[RPC_TRANSACTION_ERROR] {msg}"),
            RpcError::Request(msg) => write!(f, "[RPC_REQUEST_ERROR] {msg}"),
            RpcError::AirdropRateLimited(msg) => write!(f, "[RPC_AIRDROP_RATE_LIMITED] {msg}"),
        }
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_as_network_class_but_distinct_variant() {
        let err = RpcError::classify("too many requests", Some(429));
        assert!(matches!(err, RpcError::RateLimit(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn classifies_connection_refused_as_network() {
        let err = RpcError::classify("ECONNREFUSED", None);
        assert!(matches!(err, RpcError::Network(_)));
    }

    #[test]
    fn classifies_insufficient_funds_as_transaction() {
        let err = RpcError::classify("insufficient funds for transaction", None);
        assert!(!err.is_retryable());
        assert!(matches!(err, RpcError::Transaction(_)));
    }

    #[test]
    fn unrecognized_message_defaults_to_request() {
        let err = RpcError::classify("bad base58 address", None);
        assert!(matches!(err, RpcError::Request(_)));
    }
}
