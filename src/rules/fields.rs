//! Field resolution (spec §4.2): mapping a textual field name to a value
//! drawn from market data, the evaluating agent's own state, or a peer's
//! last-known state.

use tracing::warn;

use crate::models::{AgentState, FieldValue, MarketData};

/// Everything a condition might need to resolve a field against.
pub struct EvaluationContext<'a> {
    pub agent: &'a AgentState,
    pub market: &'a MarketData,
    pub peers: &'a [AgentState],
}

/// Stateless — field resolution never mutates anything, so one resolver
/// instance is shared by every rule evaluation.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldResolver;

impl FieldResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, field: &str, ctx: &EvaluationContext<'_>) -> FieldValue {
        if let Some(rest) = strip_peer_prefix(field) {
            return self.resolve_peer(rest, ctx);
        }

        if let Some(value) = resolve_market_field(field, ctx.market) {
            return value;
        }

        if let Some(value) = resolve_self_subfield(field, ctx.agent) {
            return value;
        }

        warn!(field, "unknown field in condition, defaulting to 0");
        FieldValue::Number(0.0)
    }

    fn resolve_peer(&self, rest: &str, ctx: &EvaluationContext<'_>) -> FieldValue {
        // `rest` is everything after "peer.": "<name-or-id>.<subfield>"
        let mut parts = rest.splitn(2, '.');
        let (Some(who), Some(subfield)) = (parts.next(), parts.next()) else {
            warn!(field = %format!("peer.{rest}"), "malformed peer field key, defaulting to 0");
            return FieldValue::Number(0.0);
        };
        if subfield.is_empty() || who.is_empty() {
            warn!(field = %format!("peer.{rest}"), "malformed peer field key, defaulting to 0");
            return FieldValue::Number(0.0);
        }

        let peer = find_peer(who, ctx.peers);
        let Some(peer) = peer else {
            warn!(peer = %who, "peer not found, defaulting to 0");
            return FieldValue::Number(0.0);
        };

        if subfield.eq_ignore_ascii_case("last_action") || subfield.eq_ignore_ascii_case("last_trade_result") {
            return FieldValue::Text(peer.last_trade_result());
        }

        match resolve_self_subfield(subfield, peer) {
            Some(value) => value,
            None => {
                warn!(peer = %who, subfield, "unknown peer subfield, defaulting to 0");
                FieldValue::Number(0.0)
            }
        }
    }
}

fn strip_peer_prefix(field: &str) -> Option<&str> {
    if field.len() > 5 && field[..5].eq_ignore_ascii_case("peer.") {
        Some(&field[5..])
    } else {
        None
    }
}

fn find_peer<'a>(who: &str, peers: &'a [AgentState]) -> Option<&'a AgentState> {
    if who.chars().all(|c| c.is_ascii_digit()) {
        let id: u64 = who.parse().ok()?;
        return peers.iter().find(|p| p.agent_id == id);
    }
    peers.iter().find(|p| p.name.eq_ignore_ascii_case(who))
}

fn resolve_market_field(field: &str, market: &MarketData) -> Option<FieldValue> {
    let value = match field {
        "price" => market.price,
        "price_change" | "price_change_1m" => market.price_change_1m,
        "price_change_5m" => market.price_change_5m,
        "price_drop" => (-market.price_change_1m).max(0.0),
        "price_rise" => market.price_change_1m.max(0.0),
        "volume_change" | "volume_change_1m" => market.volume_change_1m,
        "volume_spike" => market.volume_change_1m.max(0.0),
        _ => return None,
    };
    Some(FieldValue::Number(value))
}

/// Shared by both the self-field lookup and peer-field lookup (minus the
/// `last_action`/`last_trade_result` alias handled by the caller for peers).
fn resolve_self_subfield(subfield: &str, agent: &AgentState) -> Option<FieldValue> {
    let value = match subfield {
        "balance" => FieldValue::Number(agent.balance),
        "position_size" => FieldValue::Number(agent.position_size),
        "consecutive_wins" => FieldValue::Number(agent.consecutive_wins as f64),
        "consecutive_errors" => FieldValue::Number(agent.consecutive_errors as f64),
        "tick_count" => FieldValue::Number(agent.tick_count as f64),
        "status" => FieldValue::Text(agent.status.as_str().to_string()),
        "last_trade_amount" => FieldValue::Number(agent.last_trade_amount),
        "last_trade_result" => FieldValue::Text(agent.last_trade_result()),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentStatus, MarketSource};

    fn market() -> MarketData {
        MarketData {
            price: 100.0,
            price_change_1m: -10.0,
            price_change_5m: 2.0,
            volume_change_1m: 5.0,
            timestamp: 0,
            source: MarketSource::Simulated,
        }
    }

    fn agent(id: u64, name: &str) -> AgentState {
        AgentState::new(id, name.to_string(), "demo".to_string(), "addr".to_string())
    }

    #[test]
    fn resolves_derived_market_fields() {
        let m = market();
        let a = agent(1, "Alpha");
        let peers = vec![];
        let ctx = EvaluationContext { agent: &a, market: &m, peers: &peers };
        let resolver = FieldResolver::new();
        assert_eq!(resolver.resolve("price_drop", &ctx), FieldValue::Number(10.0));
        assert_eq!(resolver.resolve("price_rise", &ctx), FieldValue::Number(0.0));
        assert_eq!(resolver.resolve("volume_spike", &ctx), FieldValue::Number(5.0));
    }

    #[test]
    fn resolves_peer_by_name_case_insensitive() {
        let m = market();
        let mut peer = agent(2, "Beta");
        peer.balance = 2.0;
        peer.status = AgentStatus::Error;
        let a = agent(1, "Alpha");
        let peers = vec![peer];
        let ctx = EvaluationContext { agent: &a, market: &m, peers: &peers };
        let resolver = FieldResolver::new();
        assert_eq!(resolver.resolve("peer.beta.balance", &ctx), FieldValue::Number(2.0));
    }

    #[test]
    fn resolves_peer_by_numeric_id() {
        let m = market();
        let mut peer = agent(7, "Gamma");
        peer.position_size = 3.5;
        let a = agent(1, "Alpha");
        let peers = vec![peer];
        let ctx = EvaluationContext { agent: &a, market: &m, peers: &peers };
        let resolver = FieldResolver::new();
        assert_eq!(resolver.resolve("peer.7.position_size", &ctx), FieldValue::Number(3.5));
    }

    #[test]
    fn missing_peer_defaults_to_zero() {
        let m = market();
        let a = agent(1, "Alpha");
        let peers = vec![];
        let ctx = EvaluationContext { agent: &a, market: &m, peers: &peers };
        let resolver = FieldResolver::new();
        assert_eq!(resolver.resolve("peer.ghost.balance", &ctx), FieldValue::Number(0.0));
    }

    #[test]
    fn malformed_peer_key_defaults_to_zero() {
        let m = market();
        let a = agent(1, "Alpha");
        let peers = vec![];
        let ctx = EvaluationContext { agent: &a, market: &m, peers: &peers };
        let resolver = FieldResolver::new();
        assert_eq!(resolver.resolve("peer.onlyname", &ctx), FieldValue::Number(0.0));
    }

    #[test]
    fn unknown_field_defaults_to_zero() {
        let m = market();
        let a = agent(1, "Alpha");
        let peers = vec![];
        let ctx = EvaluationContext { agent: &a, market: &m, peers: &peers };
        let resolver = FieldResolver::new();
        assert_eq!(resolver.resolve("not_a_real_field", &ctx), FieldValue::Number(0.0));
    }

    #[test]
    fn last_trade_result_extracts_leading_verb() {
        let mut a = agent(1, "Alpha");
        a.last_action = Some("buy 0.1 SOL".to_string());
        assert_eq!(a.last_trade_result(), "buy");
        a.last_action = None;
        assert_eq!(a.last_trade_result(), "none");
        a.last_action = Some("none (insufficient balance)".to_string());
        assert_eq!(a.last_trade_result(), "none");
    }
}
