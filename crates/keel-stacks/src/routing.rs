//! Routing rule generation.
//!
//! The production stack owns the catch-all route. Every other stack is only
//! reachable through `?stack=<name>`. Rules depend on nothing but the stack's
//! own name, so registrations from different stacks commute.

use keel_core::routing::{CATCH_ALL_PATTERN, MatchCondition, RoutingRule, STACK_QUERY_KEY};

/// Priority held by the catch-all rule.
pub const CATCH_ALL_PRIORITY: u32 = 1;

/// How a stack is attached to the shared listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Catch-all path rule at the highest precedence.
    Default,
    /// Query-string discriminated rule without an explicit priority.
    Discriminated(String),
}

impl RoutingPolicy {
    /// Policy for `stack`, given the name of the production stack.
    pub fn for_stack(stack: &str, production: &str) -> Self {
        if stack == production {
            RoutingPolicy::Default
        } else {
            RoutingPolicy::Discriminated(stack.to_string())
        }
    }

    pub fn condition(&self) -> MatchCondition {
        match self {
            RoutingPolicy::Default => MatchCondition::path(CATCH_ALL_PATTERN),
            RoutingPolicy::Discriminated(stack) => MatchCondition::query(STACK_QUERY_KEY, stack),
        }
    }

    pub fn priority(&self) -> Option<u32> {
        match self {
            RoutingPolicy::Default => Some(CATCH_ALL_PRIORITY),
            RoutingPolicy::Discriminated(_) => None,
        }
    }
}

/// Derives each application stack's rule on the shared listener.
#[derive(Debug, Clone)]
pub struct RuleGenerator {
    production: String,
}

impl RuleGenerator {
    pub fn new(production: impl Into<String>) -> Self {
        Self {
            production: production.into(),
        }
    }

    pub fn production(&self) -> &str {
        &self.production
    }

    pub fn policy_for(&self, stack: &str) -> RoutingPolicy {
        RoutingPolicy::for_stack(stack, &self.production)
    }

    /// The rule forwarding `stack`'s traffic to `target_group`.
    ///
    /// Two stacks both configured as production are not detected here; the
    /// listener rejects the second catch-all when it is applied.
    pub fn rule_for(&self, stack: &str, target_group: impl Into<String>) -> RoutingRule {
        let policy = self.policy_for(stack);
        RoutingRule {
            stack: stack.to_string(),
            condition: policy.condition(),
            priority: policy.priority(),
            target_group: target_group.into(),
        }
    }
}

impl Default for RuleGenerator {
    fn default() -> Self {
        Self::new("prod")
    }
}
