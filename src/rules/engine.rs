//! Rule evaluation, scoring, and decision construction (spec §4.3–§4.4).

use std::collections::HashMap;

use crate::models::{Action, BlockReason, CooldownState, DecisionResult, Rule, RuleEvaluation};

use super::conditions::ConditionEvaluator;
use super::cooldown::CooldownTracker;
use super::fields::EvaluationContext;

/// Minimum aggregate score for a winning action to actually execute.
pub const DEFAULT_EXECUTION_THRESHOLD: i64 = 70;

#[derive(Debug, Clone, Copy)]
pub struct RuleEngine {
    pub execution_threshold: i64,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self { execution_threshold: DEFAULT_EXECUTION_THRESHOLD }
    }
}

impl RuleEngine {
    pub fn new(execution_threshold: i64) -> Self {
        Self { execution_threshold }
    }

    /// Evaluate every rule against `ctx`, apply cooldown gating and the
    /// balance pre-check, aggregate scores per action (insertion order of
    /// the first contributing rule breaks ties), and build the final
    /// decision. On an actionable decision, records the winning rule's
    /// cooldown before returning.
    pub fn evaluate(
        &self,
        rules: &[Rule],
        ctx: &EvaluationContext<'_>,
        cooldown: &mut CooldownTracker,
        now_ms: i64,
    ) -> (Vec<RuleEvaluation>, DecisionResult) {
        let evaluator = ConditionEvaluator::new();
        let mut evaluations = Vec::with_capacity(rules.len());

        let mut order: Vec<Action> = Vec::new();
        let mut totals: HashMap<Action, i64> = HashMap::new();
        let mut best_rule_for_action: HashMap<Action, (i64, usize)> = HashMap::new();

        let mut any_matched = false;
        let mut saw_actionable_matched = false;
        let mut saw_none_matched = false;
        let mut all_actionable_blocked = true;

        for (i, rule) in rules.iter().enumerate() {
            let gate = cooldown.check(i, rule.cooldown_seconds, now_ms);
            if gate.active {
                evaluations.push(RuleEvaluation {
                    rule_index: i,
                    rule_name: rule.name.clone(),
                    conditions: vec![],
                    matched: false,
                    score: 0,
                    cooldown: Some(CooldownState::Active),
                    cooldown_remaining: Some(gate.remaining_ms),
                    blocked: None,
                });
                continue;
            }

            let (matched, results) = evaluator.evaluate_all(&rule.conditions, ctx);
            let score = if matched { rule.weight } else { 0 };
            let mut blocked = None;

            if matched {
                any_matched = true;
                if rule.action.is_actionable() {
                    saw_actionable_matched = true;
                    if ctx.agent.balance < rule.amount {
                        blocked = Some(BlockReason::InsufficientBalance);
                    } else {
                        all_actionable_blocked = false;
                        if !totals.contains_key(&rule.action) {
                            order.push(rule.action);
                        }
                        *totals.entry(rule.action).or_insert(0) += rule.weight;
                        let is_better = match best_rule_for_action.get(&rule.action) {
                            None => true,
                            Some((best_weight, _)) => rule.weight > *best_weight,
                        };
                        if is_better {
                            best_rule_for_action.insert(rule.action, (rule.weight, i));
                        }
                    }
                } else {
                    saw_none_matched = true;
                }
            }

            evaluations.push(RuleEvaluation {
                rule_index: i,
                rule_name: rule.name.clone(),
                conditions: results,
                matched,
                score,
                cooldown: (rule.cooldown_seconds > 0).then_some(CooldownState::Clear),
                cooldown_remaining: None,
                blocked,
            });
        }

        let mut winner: Option<(Action, i64)> = None;
        for action in &order {
            let total = totals[action];
            winner = match winner {
                None => Some((*action, total)),
                Some((_, best)) if total > best => Some((*action, total)),
                keep => keep,
            };
        }

        let decision = if let Some((action, total)) = winner {
            if total >= self.execution_threshold {
                let (_, rule_index) = best_rule_for_action[&action];
                let rule = &rules[rule_index];
                cooldown.record(rule_index, now_ms);
                DecisionResult {
                    action,
                    amount: Some(rule.amount),
                    rule_index: Some(rule_index),
                    rule_name: Some(rule.name.clone()),
                    score: total,
                    reason: format!("rule '{}' matched with aggregate score {}", rule.name, total),
                }
            } else {
                DecisionResult {
                    action: Action::None,
                    amount: None,
                    rule_index: None,
                    rule_name: None,
                    score: total,
                    reason: format!(
                        "aggregate score {} is below execution threshold {}",
                        total, self.execution_threshold
                    ),
                }
            }
        } else if saw_actionable_matched && all_actionable_blocked {
            DecisionResult {
                action: Action::None,
                amount: None,
                rule_index: None,
                rule_name: None,
                score: 0,
                reason: "insufficient_balance".to_string(),
            }
        } else if !any_matched {
            DecisionResult {
                action: Action::None,
                amount: None,
                rule_index: None,
                rule_name: None,
                score: 0,
                reason: "no rules matched".to_string(),
            }
        } else {
            let _ = saw_none_matched;
            DecisionResult {
                action: Action::None,
                amount: None,
                rule_index: None,
                rule_name: None,
                score: 0,
                reason: "no actionable rules matched".to_string(),
            }
        };

        (evaluations, decision)
    }
}
