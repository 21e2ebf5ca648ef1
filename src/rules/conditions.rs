//! Condition and compound-group evaluation (spec §4.3).

use crate::models::{AgentStatus, Condition, ConditionResult, FieldValue, Logic, Operator};

use super::fields::{EvaluationContext, FieldResolver};

#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionEvaluator {
    resolver: FieldResolver,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self { resolver: FieldResolver::new() }
    }

    /// Evaluate a single condition. Never short-circuits a group — callers
    /// evaluate every condition so the trace can record every result.
    pub fn evaluate_one(&self, condition: &Condition, ctx: &EvaluationContext<'_>) -> ConditionResult {
        let actual = self.resolver.resolve(&condition.field, ctx);
        let passed = apply_operator(condition.operator, &actual, &condition.threshold);
        let peer_data_stale = peer_staleness(&condition.field, ctx);

        ConditionResult {
            field: condition.field.clone(),
            operator: condition.operator,
            threshold: condition.threshold.clone(),
            actual,
            passed,
            peer_data_stale,
        }
    }

    /// Evaluate a rule's full (possibly mixed AND/OR/NOT) condition list and
    /// return whether the whole expression passed, plus every individual
    /// result for the trace.
    pub fn evaluate_all(&self, conditions: &[Condition], ctx: &EvaluationContext<'_>) -> (bool, Vec<ConditionResult>) {
        let results: Vec<ConditionResult> = conditions.iter().map(|c| self.evaluate_one(c, ctx)).collect();

        let mut and_pass = true;
        let mut has_and = false;
        let mut or_groups: Vec<Vec<bool>> = Vec::new();
        let mut current_or: Option<Vec<bool>> = None;
        let mut not_groups_pass = true;

        for (condition, result) in conditions.iter().zip(results.iter()) {
            match condition.logic {
                Logic::Not => {
                    if let Some(group) = current_or.take() {
                        or_groups.push(group);
                    }
                    // A NOT condition inverts its own inner evaluation.
                    if !result.passed {
                        // inversion passes
                    } else {
                        not_groups_pass = false;
                    }
                }
                Logic::Or => {
                    current_or.get_or_insert_with(Vec::new).push(result.passed);
                }
                Logic::And => {
                    if let Some(group) = current_or.take() {
                        or_groups.push(group);
                    }
                    has_and = true;
                    and_pass = and_pass && result.passed;
                }
            }
        }
        if let Some(group) = current_or.take() {
            or_groups.push(group);
        }

        let or_pass = or_groups.iter().all(|group| group.iter().any(|&p| p));
        let and_component = if has_and { and_pass } else { true };

        let whole_passed = and_component && or_pass && not_groups_pass;
        (whole_passed, results)
    }
}

fn apply_operator(operator: Operator, actual: &FieldValue, threshold: &FieldValue) -> bool {
    match operator {
        Operator::Eq => values_equal(actual, threshold),
        Operator::Ne => !values_equal(actual, threshold),
        Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
            let (Some(a), Some(t)) = (actual.as_f64(), threshold.as_f64()) else {
                return false;
            };
            match operator {
                Operator::Gt => a > t,
                Operator::Lt => a < t,
                Operator::Ge => a >= t,
                Operator::Le => a <= t,
                _ => unreachable!(),
            }
        }
    }
}

fn values_equal(actual: &FieldValue, threshold: &FieldValue) -> bool {
    match (actual, threshold) {
        (FieldValue::Number(_), _) | (_, FieldValue::Number(_)) => {
            match (actual.as_f64(), threshold.as_f64()) {
                (Some(a), Some(t)) => a == t,
                _ => actual.as_text().eq_ignore_ascii_case(&threshold.as_text()),
            }
        }
        (FieldValue::Text(a), FieldValue::Text(b)) => a.eq_ignore_ascii_case(b),
    }
}

fn peer_staleness(field: &str, ctx: &EvaluationContext<'_>) -> Option<bool> {
    if field.len() <= 5 || !field[..5].eq_ignore_ascii_case("peer.") {
        return None;
    }
    let rest = &field[5..];
    let who = rest.split('.').next()?;
    let peer = if who.chars().all(|c| c.is_ascii_digit()) {
        let id: u64 = who.parse().ok()?;
        ctx.peers.iter().find(|p| p.agent_id == id)
    } else {
        ctx.peers.iter().find(|p| p.name.eq_ignore_ascii_case(who))
    };
    match peer {
        Some(p) if p.status == AgentStatus::Error => Some(true),
        _ => None,
    }
}
