//! The decision module seam: wraps rule evaluation behind a trait so the
//! agent runtime never has to know it's talking to a rule engine specifically.

use crate::models::{AgentConfig, AgentState, DecisionResult, MarketData, RuleEvaluation};
use crate::rules::{CooldownTracker, EvaluationContext, RuleEngine};

/// Output of one full decision pass: every rule's evaluation plus the
/// resulting decision, ready to be folded into a `DecisionTrace`.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub evaluations: Vec<RuleEvaluation>,
    pub decision: DecisionResult,
}

/// Anything capable of turning an agent's current state, its rules, and a
/// market snapshot into a decision. The rule-based engine is the only
/// implementation today, but agents hold this behind a trait object so a
/// future strategy style doesn't require touching the agent loop.
pub trait DecisionModule: Send {
    fn evaluate(
        &mut self,
        agent: &AgentState,
        market: &MarketData,
        peers: &[AgentState],
        now_ms: i64,
    ) -> EngineOutput;

    /// Clear any accumulated per-rule state (cooldowns). Called when an
    /// agent's rule set is replaced via `updateConfig`.
    fn reset(&mut self) {}

    /// React to a config swap. The rule-based module picks up the new rule
    /// list; cooldown state is left untouched (a config update never
    /// implies `reset()`).
    fn on_config_updated(&mut self, _config: &AgentConfig) {}
}

/// The declarative rule engine bound to a specific rule set and its own
/// cooldown bookkeeping.
pub struct RuleBasedDecisionModule {
    engine: RuleEngine,
    cooldown: CooldownTracker,
    rules: Vec<crate::models::Rule>,
}

impl RuleBasedDecisionModule {
    pub fn new(rules: Vec<crate::models::Rule>, execution_threshold: i64) -> Self {
        Self {
            engine: RuleEngine::new(execution_threshold),
            cooldown: CooldownTracker::new(),
            rules,
        }
    }

    /// Replace the rule set in place. Per spec, a config update never
    /// rewinds or touches cooldown state for rules that persist across the
    /// swap — callers that want a clean slate should call `reset()` too.
    pub fn set_rules(&mut self, rules: Vec<crate::models::Rule>) {
        self.rules = rules;
    }
}

impl DecisionModule for RuleBasedDecisionModule {
    fn evaluate(
        &mut self,
        agent: &AgentState,
        market: &MarketData,
        peers: &[AgentState],
        now_ms: i64,
    ) -> EngineOutput {
        let ctx = EvaluationContext { agent, market, peers };
        let (evaluations, decision) = self.engine.evaluate(&self.rules, &ctx, &mut self.cooldown, now_ms);
        EngineOutput { evaluations, decision }
    }

    fn on_config_updated(&mut self, config: &AgentConfig) {
        self.set_rules(config.rules.clone());
    }

    fn reset(&mut self) {
        self.cooldown.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, Condition, FieldValue, Logic, MarketSource, Operator, Rule};

    #[test]
    fn wraps_engine_and_tracks_cooldown_across_calls() {
        let rules = vec![Rule {
            name: "dip-buy".into(),
            conditions: vec![Condition {
                field: "price_drop".into(),
                operator: Operator::Gt,
                threshold: FieldValue::Number(5.0),
                logic: Logic::And,
            }],
            action: Action::Buy,
            amount: 0.1,
            weight: 80,
            cooldown_seconds: 60,
        }];
        let mut module = RuleBasedDecisionModule::new(rules, 70);
        let mut agent = AgentState::new(1, "Alpha".into(), "demo".into(), "addr".into());
        agent.balance = 1.0;
        let market = MarketData {
            price: 100.0,
            price_change_1m: -10.0,
            price_change_5m: 0.0,
            volume_change_1m: 0.0,
            timestamp: 0,
            source: MarketSource::Simulated,
        };

        let first = module.evaluate(&agent, &market, &[], 0);
        assert_eq!(first.decision.action, Action::Buy);

        let second = module.evaluate(&agent, &market, &[], 1_000);
        assert_eq!(second.decision.action, Action::None);

        module.reset();
        let third = module.evaluate(&agent, &market, &[], 1_000);
        assert_eq!(third.decision.action, Action::Buy);
    }
}
