//! Error types for Keel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A foundation stack does not publish an output an application stack needs.
    #[error("stack '{stack}' is missing required output '{key}'")]
    MissingOutput { stack: String, key: String },

    /// The traffic-routing backend rejected a rule on a shared listener.
    #[error("routing collision on listener {listener}: {message}")]
    RoutingCollision { listener: String, message: String },

    /// A single resource failed to reach its desired state.
    #[error("resource '{resource}' failed to converge: {message}")]
    ResourceConvergence { resource: String, message: String },

    /// An apply finished with one or more failed resources.
    #[error("apply of stack '{stack}' failed for {} resource(s): {}", failures.len(), summarize(failures))]
    ConvergenceFailed {
        stack: String,
        failures: Vec<ResourceFailure>,
    },

    #[error("storage provider selection failed: {0}")]
    ProviderSelection(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cycle detected in resource graph: {0}")]
    CycleDetected(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("state error: {0}")]
    State(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// A per-resource failure collected during an apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFailure {
    /// Logical name of the resource inside its stack.
    pub resource: String,
    /// Rendered error reported by the backend.
    pub message: String,
    /// Whether the backend classified the failure as a routing collision.
    pub routing_collision: bool,
}

impl ResourceFailure {
    pub fn from_error(resource: impl Into<String>, error: &Error) -> Self {
        Self {
            resource: resource.into(),
            message: error.to_string(),
            routing_collision: matches!(error, Error::RoutingCollision { .. }),
        }
    }
}

fn summarize(failures: &[ResourceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.resource, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn missing_output(stack: impl Into<String>, key: impl Into<String>) -> Self {
        Error::MissingOutput {
            stack: stack.into(),
            key: key.into(),
        }
    }

    /// True when the error, or any aggregated failure inside it, is a routing collision.
    pub fn is_routing_collision(&self) -> bool {
        match self {
            Error::RoutingCollision { .. } => true,
            Error::ConvergenceFailed { failures, .. } => {
                failures.iter().any(|f| f.routing_collision)
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::State(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_output_names_stack_and_key() {
        let err = Error::missing_output("foundation-prod", "listenerId");
        assert_eq!(
            err.to_string(),
            "stack 'foundation-prod' is missing required output 'listenerId'"
        );
    }

    #[test]
    fn test_routing_collision_detected_in_aggregate() {
        let collision = Error::RoutingCollision {
            listener: "arn:listener".to_string(),
            message: "priority 1 already taken".to_string(),
        };
        let err = Error::ConvergenceFailed {
            stack: "prod".to_string(),
            failures: vec![ResourceFailure::from_error("listenerRule", &collision)],
        };
        assert!(err.is_routing_collision());
        assert!(err.to_string().contains("listenerRule"));
    }
}
