//! Stack types: the deployment units Keel provisions.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Kind of stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackKind {
    /// Shared resources built once and referenced by many application stacks.
    Foundation,
    /// Per-environment compute bound to one foundation stack.
    Application,
}

impl std::fmt::Display for StackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackKind::Foundation => write!(f, "foundation"),
            StackKind::Application => write!(f, "application"),
        }
    }
}

/// Stack status after the most recent apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackStatus {
    Pending,
    Converging,
    Ready,
    /// Some resources converged, others failed or were skipped.
    Partial,
    Cancelled,
    Destroyed,
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackStatus::Pending => write!(f, "pending"),
            StackStatus::Converging => write!(f, "converging"),
            StackStatus::Ready => write!(f, "ready"),
            StackStatus::Partial => write!(f, "partial"),
            StackStatus::Cancelled => write!(f, "cancelled"),
            StackStatus::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// A deployment environment.
///
/// Application stacks carry the name of exactly one foundation stack; the
/// graph is two levels deep and application stacks never reference each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub kind: StackKind,
    pub foundation: Option<String>,
}

impl Stack {
    pub fn foundation(name: impl Into<String>) -> Result<Self> {
        let name = validate_name(name.into())?;
        Ok(Self {
            name,
            kind: StackKind::Foundation,
            foundation: None,
        })
    }

    pub fn application(name: impl Into<String>, foundation: impl Into<String>) -> Result<Self> {
        let name = validate_name(name.into())?;
        let foundation = validate_name(foundation.into())?;
        Ok(Self {
            name,
            kind: StackKind::Application,
            foundation: Some(foundation),
        })
    }

    /// Key under which the stack's state is stored. Names are unique per kind.
    pub fn state_key(&self) -> String {
        format!("{}-{}", self.kind, self.name)
    }
}

impl std::fmt::Display for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Stack names end up in resource names, URLs and query strings.
fn validate_name(name: String) -> Result<String> {
    if name.is_empty() {
        return Err(Error::InvalidInput("stack name must not be empty".to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidInput(format!(
            "stack name '{}' may only contain ASCII letters, digits, '-' and '_'",
            name
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_stack_references_foundation() {
        let stack = Stack::application("preview-42", "foundation-prod").unwrap();
        assert_eq!(stack.kind, StackKind::Application);
        assert_eq!(stack.foundation.as_deref(), Some("foundation-prod"));
        assert_eq!(stack.state_key(), "application-preview-42");
    }

    #[test]
    fn test_stack_name_validation() {
        assert!(Stack::foundation("").is_err());
        assert!(Stack::foundation("has space").is_err());
        assert!(Stack::foundation("feature_x-1").is_ok());
    }

    #[test]
    fn test_state_keys_differ_per_kind() {
        let foundation = Stack::foundation("prod").unwrap();
        let app = Stack::application("prod", "prod").unwrap();
        assert_ne!(foundation.state_key(), app.state_key());
    }
}
