//! Listener routing rules.
//!
//! Many application stacks share one listener. Exactly one of them may own
//! the catch-all rule; every other rule must match on a discriminator so no
//! two rules can claim the same request.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Glob that matches every request path.
pub const CATCH_ALL_PATTERN: &str = "*";

/// Query parameter naming the stack a request is meant for.
pub const STACK_QUERY_KEY: &str = "stack";

/// How a rule selects requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchCondition {
    PathPattern { pattern: String },
    QueryParameter { key: String, value: String },
}

impl MatchCondition {
    pub fn path(pattern: impl Into<String>) -> Self {
        MatchCondition::PathPattern {
            pattern: pattern.into(),
        }
    }

    pub fn query(key: impl Into<String>, value: impl Into<String>) -> Self {
        MatchCondition::QueryParameter {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, MatchCondition::PathPattern { pattern } if pattern == CATCH_ALL_PATTERN)
    }
}

impl std::fmt::Display for MatchCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchCondition::PathPattern { pattern } => write!(f, "path {}", pattern),
            MatchCondition::QueryParameter { key, value } => write!(f, "query {}={}", key, value),
        }
    }
}

/// A rule forwarding matching requests on a listener to one target group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Application stack that owns the rule.
    pub stack: String,
    pub condition: MatchCondition,
    /// Explicit priority, lower is evaluated first. `None` leaves ordering to the listener.
    pub priority: Option<u32>,
    /// Handle of the target group requests are forwarded to.
    pub target_group: String,
}

impl RoutingRule {
    pub fn is_catch_all(&self) -> bool {
        self.condition.is_catch_all()
    }

    /// Encode the rule as listener-rule resource properties.
    pub fn to_properties(&self) -> BTreeMap<String, Value> {
        let mut props = BTreeMap::new();
        props.insert("stack".to_string(), json!(self.stack));
        props.insert("targetGroupArn".to_string(), json!(self.target_group));
        props.insert("actionType".to_string(), json!("forward"));
        match &self.condition {
            MatchCondition::PathPattern { pattern } => {
                props.insert("pathPattern".to_string(), json!([pattern]));
            }
            MatchCondition::QueryParameter { key, value } => {
                props.insert(
                    "queryStrings".to_string(),
                    json!([{ "key": key, "value": value }]),
                );
            }
        }
        if let Some(priority) = self.priority {
            props.insert("priority".to_string(), json!(priority));
        }
        props
    }

    /// Decode a rule from listener-rule resource properties.
    pub fn from_properties(props: &BTreeMap<String, Value>) -> Result<Self> {
        let text = |key: &str| -> Result<String> {
            props
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidInput(format!("listener rule is missing '{}'", key)))
        };

        let condition = if let Some(patterns) = props.get("pathPattern").and_then(Value::as_array)
        {
            let pattern = patterns
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidInput("empty path pattern".to_string()))?;
            MatchCondition::path(pattern)
        } else if let Some(queries) = props.get("queryStrings").and_then(Value::as_array) {
            let query = queries
                .first()
                .ok_or_else(|| Error::InvalidInput("empty query condition".to_string()))?;
            let key = query.get("key").and_then(Value::as_str).unwrap_or_default();
            let value = query.get("value").and_then(Value::as_str).unwrap_or_default();
            if key.is_empty() || value.is_empty() {
                return Err(Error::InvalidInput(
                    "query condition needs a key and a value".to_string(),
                ));
            }
            MatchCondition::query(key, value)
        } else {
            return Err(Error::InvalidInput(
                "listener rule has no match condition".to_string(),
            ));
        };

        let priority = match props.get("priority") {
            None | Some(Value::Null) => None,
            Some(v) => {
                let n = v.as_u64().filter(|n| *n > 0).ok_or_else(|| {
                    Error::InvalidInput(format!("priority must be a positive integer, got {}", v))
                })?;
                Some(u32::try_from(n).map_err(|_| {
                    Error::InvalidInput(format!("priority {} is out of range", n))
                })?)
            }
        };

        Ok(Self {
            stack: text("stack")?,
            condition,
            priority,
            target_group: text("targetGroupArn")?,
        })
    }
}

/// Check that `candidate` can join the rules already attached to `listener`.
///
/// Rules owned by the candidate's own stack are replaced, not compared.
pub fn validate_listener(
    listener: &str,
    existing: &[RoutingRule],
    candidate: &RoutingRule,
) -> Result<()> {
    if candidate.priority == Some(0) {
        return Err(Error::RoutingCollision {
            listener: listener.to_string(),
            message: format!("stack '{}' requested priority 0", candidate.stack),
        });
    }

    for rule in existing.iter().filter(|r| r.stack != candidate.stack) {
        if let (Some(a), Some(b)) = (rule.priority, candidate.priority) {
            if a == b {
                return Err(Error::RoutingCollision {
                    listener: listener.to_string(),
                    message: format!(
                        "priority {} is already held by stack '{}'",
                        a, rule.stack
                    ),
                });
            }
        }
        if rule.is_catch_all() && candidate.is_catch_all() {
            return Err(Error::RoutingCollision {
                listener: listener.to_string(),
                message: format!(
                    "catch-all route is already owned by stack '{}'",
                    rule.stack
                ),
            });
        }
        if rule.condition == candidate.condition {
            return Err(Error::RoutingCollision {
                listener: listener.to_string(),
                message: format!(
                    "condition '{}' is already routed to stack '{}'",
                    rule.condition, rule.stack
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prod_rule() -> RoutingRule {
        RoutingRule {
            stack: "prod".to_string(),
            condition: MatchCondition::path(CATCH_ALL_PATTERN),
            priority: Some(1),
            target_group: "tg-prod".to_string(),
        }
    }

    fn preview_rule(stack: &str) -> RoutingRule {
        RoutingRule {
            stack: stack.to_string(),
            condition: MatchCondition::query(STACK_QUERY_KEY, stack),
            priority: None,
            target_group: format!("tg-{}", stack),
        }
    }

    #[test]
    fn test_properties_round_trip_for_both_conditions() {
        for rule in [prod_rule(), preview_rule("preview-42")] {
            let back = RoutingRule::from_properties(&rule.to_properties()).unwrap();
            assert_eq!(back, rule);
        }
    }

    #[test]
    fn test_unprioritized_rule_omits_priority_property() {
        let props = preview_rule("preview-42").to_properties();
        assert!(!props.contains_key("priority"));
    }

    #[test]
    fn test_previews_and_prod_coexist() {
        let existing = vec![prod_rule(), preview_rule("preview-42")];
        assert!(validate_listener("l", &existing, &preview_rule("preview-43")).is_ok());
    }

    #[test]
    fn test_second_catch_all_is_a_collision() {
        let mut other = prod_rule();
        other.stack = "production".to_string();
        other.priority = Some(2);
        let err = validate_listener("l", &[prod_rule()], &other).unwrap_err();
        assert!(matches!(err, Error::RoutingCollision { .. }));
    }

    #[test]
    fn test_duplicate_priority_is_a_collision() {
        let mut other = preview_rule("preview-42");
        other.priority = Some(1);
        let err = validate_listener("l", &[prod_rule()], &other).unwrap_err();
        assert!(err.to_string().contains("priority 1"));
    }

    #[test]
    fn test_redeploying_same_stack_replaces_its_rule() {
        assert!(validate_listener("l", &[prod_rule()], &prod_rule()).is_ok());
    }

    #[test]
    fn test_rejects_malformed_properties() {
        let mut props = prod_rule().to_properties();
        props.insert("priority".to_string(), json!(0));
        assert!(RoutingRule::from_properties(&props).is_err());

        let mut props = prod_rule().to_properties();
        props.remove("pathPattern");
        assert!(RoutingRule::from_properties(&props).is_err());
    }
}
