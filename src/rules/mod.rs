//! The declarative rule engine: field resolution, condition evaluation,
//! cooldown gating, and score-weighted decision construction.

pub mod conditions;
pub mod cooldown;
pub mod engine;
pub mod fields;

pub use conditions::ConditionEvaluator;
pub use cooldown::{CooldownCheck, CooldownTracker};
pub use engine::{RuleEngine, DEFAULT_EXECUTION_THRESHOLD};
pub use fields::{EvaluationContext, FieldResolver};
