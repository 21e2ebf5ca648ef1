//! Hand-rolled JSON schema validation for agent config files (spec §6).
//!
//! `serde`'s derived `Deserialize` rejects malformed input too, but its
//! errors aren't path-qualified the way the spec requires
//! (`rules[0].conditions[1].operator must be one of: >, <, ...`). This
//! validator walks the raw `serde_json::Value` first and only hands the
//! value to `serde_json::from_value` once it's known-good.

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::models::AgentConfig;

const TOP_LEVEL_FIELDS: &[&str] = &["name", "strategy", "intervalMs", "rules"];
const RULE_FIELDS: &[&str] = &["name", "conditions", "action", "amount", "weight", "cooldownSeconds"];
const CONDITION_FIELDS: &[&str] = &["field", "operator", "threshold", "logic"];
const ACTIONS: &[&str] = &["buy", "sell", "transfer", "none"];
const OPERATORS: &[&str] = &[">", "<", ">=", "<=", "==", "!="];
const LOGIC_VALUES: &[&str] = &["AND", "OR", "NOT"];

/// Validate, then deserialize. Returns the first violation found, walking
/// top-down and left-to-right so error ordering is deterministic.
pub fn parse_agent_config(raw: &str) -> Result<AgentConfig> {
    let value: Value = serde_json::from_str(raw).map_err(|e| anyhow!("Config is not valid JSON: {e}"))?;
    validate(&value)?;
    serde_json::from_value(value).map_err(|e| anyhow!("Config failed to deserialize after validation: {e}"))
}

fn validate(value: &Value) -> Result<()> {
    let obj = require_object(value, "")?;
    reject_unknown(obj, "", TOP_LEVEL_FIELDS)?;

    let name = require_string(obj, "name")?;
    if name.trim().is_empty() {
        return Err(anyhow!("name must be non-empty"));
    }
    require_string(obj, "strategy")?;

    if let Some(interval) = obj.get("intervalMs") {
        let n = interval.as_u64().ok_or_else(|| anyhow!("intervalMs must be an integer"))?;
        if n < 1000 {
            return Err(anyhow!("intervalMs must be >= 1000"));
        }
    }

    let rules = obj
        .get("rules")
        .ok_or_else(|| anyhow!("Missing required property: rules"))?
        .as_array()
        .ok_or_else(|| anyhow!("rules must be an array"))?;
    if rules.is_empty() {
        return Err(anyhow!("rules must be non-empty"));
    }
    for (i, rule) in rules.iter().enumerate() {
        validate_rule(rule, i)?;
    }
    Ok(())
}

fn validate_rule(value: &Value, index: usize) -> Result<()> {
    let path = format!("rules[{index}]");
    let obj = require_object(value, &path)?;
    reject_unknown(obj, &path, RULE_FIELDS)?;

    require_field_string(obj, "name", &path)?;

    let conditions = obj
        .get("conditions")
        .ok_or_else(|| anyhow!("Missing required property: {path}.conditions"))?
        .as_array()
        .ok_or_else(|| anyhow!("{path}.conditions must be an array"))?;
    if conditions.is_empty() {
        return Err(anyhow!("{path}.conditions must be non-empty"));
    }
    for (i, condition) in conditions.iter().enumerate() {
        validate_condition(condition, &format!("{path}.conditions[{i}]"))?;
    }

    let action = obj
        .get("action")
        .ok_or_else(|| anyhow!("Missing required property: {path}.action"))?
        .as_str()
        .ok_or_else(|| anyhow!("{path}.action must be a string"))?;
    if !ACTIONS.contains(&action) {
        return Err(anyhow!("{path}.action must be one of: {}", ACTIONS.join(", ")));
    }

    let amount = obj
        .get("amount")
        .ok_or_else(|| anyhow!("Missing required property: {path}.amount"))?
        .as_f64()
        .ok_or_else(|| anyhow!("{path}.amount must be a number"))?;
    if amount <= 0.0 {
        return Err(anyhow!("{path}.amount must be > 0"));
    }

    let weight = obj
        .get("weight")
        .ok_or_else(|| anyhow!("Missing required property: {path}.weight"))?
        .as_i64()
        .ok_or_else(|| anyhow!("{path}.weight must be an integer"))?;
    if !(0..=100).contains(&weight) {
        return Err(anyhow!("{path}.weight must be in [0, 100]"));
    }

    if let Some(cooldown) = obj.get("cooldownSeconds") {
        let n = cooldown.as_u64().ok_or_else(|| anyhow!("{path}.cooldownSeconds must be an integer"))?;
        let _ = n; // any u64 is >= 0
    } else {
        return Err(anyhow!("Missing required property: {path}.cooldownSeconds"));
    }

    Ok(())
}

fn validate_condition(value: &Value, path: &str) -> Result<()> {
    let obj = require_object(value, path)?;
    reject_unknown(obj, path, CONDITION_FIELDS)?;

    require_field_string(obj, "field", path)?;

    let operator = obj
        .get("operator")
        .ok_or_else(|| anyhow!("Missing required property: {path}.operator"))?
        .as_str()
        .ok_or_else(|| anyhow!("{path}.operator must be a string"))?;
    if !OPERATORS.contains(&operator) {
        return Err(anyhow!("{path}.operator must be one of: {}", OPERATORS.join(", ")));
    }

    match obj.get("threshold") {
        Some(Value::Number(_)) | Some(Value::String(_)) => {}
        Some(_) => return Err(anyhow!("{path}.threshold must be a number or string")),
        None => return Err(anyhow!("Missing required property: {path}.threshold")),
    }

    if let Some(logic) = obj.get("logic") {
        let logic = logic.as_str().ok_or_else(|| anyhow!("{path}.logic must be a string"))?;
        if !LOGIC_VALUES.contains(&logic) {
            return Err(anyhow!("{path}.logic must be one of: {}", LOGIC_VALUES.join(", ")));
        }
    }

    Ok(())
}

fn require_object<'a>(value: &'a Value, path: &str) -> Result<&'a serde_json::Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        if path.is_empty() {
            anyhow!("Config must be a JSON object")
        } else {
            anyhow!("{path} must be an object")
        }
    })
}

fn require_string<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Result<&'a str> {
    obj.get(key)
        .ok_or_else(|| anyhow!("Missing required property: {key}"))?
        .as_str()
        .ok_or_else(|| anyhow!("{key} must be a string"))
}

fn require_field_string<'a>(obj: &'a serde_json::Map<String, Value>, key: &str, path: &str) -> Result<&'a str> {
    obj.get(key)
        .ok_or_else(|| anyhow!("Missing required property: {path}.{key}"))?
        .as_str()
        .ok_or_else(|| anyhow!("{path}.{key} must be a string"))
}

fn reject_unknown(obj: &serde_json::Map<String, Value>, path: &str, allowed: &[&str]) -> Result<()> {
    for key in obj.keys() {
        if !allowed.contains(&key.as_str()) {
            return if path.is_empty() {
                Err(anyhow!("Unknown property: {key}"))
            } else {
                Err(anyhow!("Unknown property: {path}.{key}"))
            };
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Value {
        serde_json::json!({
            "name": "Alpha",
            "strategy": "dip-buyer",
            "rules": [{
                "name": "buy-the-dip",
                "conditions": [{"field": "price_drop", "operator": ">", "threshold": 5}],
                "action": "buy",
                "amount": 0.1,
                "weight": 80,
                "cooldownSeconds": 60
            }]
        })
    }

    #[test]
    fn valid_config_parses() {
        let raw = valid_config().to_string();
        let config = parse_agent_config(&raw).unwrap();
        assert_eq!(config.name, "Alpha");
        assert_eq!(config.rules.len(), 1);
    }

    #[test]
    fn missing_action_is_path_qualified() {
        let mut value = valid_config();
        value["rules"][0].as_object_mut().unwrap().remove("action");
        let err = parse_agent_config(&value.to_string()).unwrap_err();
        assert_eq!(err.to_string(), "Missing required property: rules[0].action");
    }

    #[test]
    fn bad_operator_lists_allowed_values() {
        let mut value = valid_config();
        value["rules"][0]["conditions"][0]["operator"] = Value::String("~=".into());
        let err = parse_agent_config(&value.to_string()).unwrap_err();
        assert_eq!(err.to_string(), "rules[0].conditions[0].operator must be one of: >, <, >=, <=, ==, !=");
    }

    #[test]
    fn rejects_additional_properties() {
        let mut value = valid_config();
        value.as_object_mut().unwrap().insert("extra".into(), Value::Bool(true));
        let err = parse_agent_config(&value.to_string()).unwrap_err();
        assert_eq!(err.to_string(), "Unknown property: extra");
    }

    #[test]
    fn rejects_empty_rules() {
        let mut value = valid_config();
        value["rules"] = Value::Array(vec![]);
        assert!(parse_agent_config(&value.to_string()).is_err());
    }

    #[test]
    fn rejects_weight_out_of_range() {
        let mut value = valid_config();
        value["rules"][0]["weight"] = Value::from(150);
        assert!(parse_agent_config(&value.to_string()).is_err());
    }
}
