//! Persisted stack state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;
use crate::contract::Outputs;
use crate::resource::ResourceState;
use crate::stack::{Stack, StackKind, StackStatus};

/// Everything recorded about a stack after an apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    pub stack: Stack,
    pub status: StackStatus,
    /// Converged resources keyed by logical name.
    pub resources: BTreeMap<String, ResourceState>,
    /// Outputs published for other stacks.
    pub outputs: Outputs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StackState {
    pub fn new(stack: Stack) -> Self {
        let now = Utc::now();
        Self {
            stack,
            status: StackStatus::Pending,
            resources: BTreeMap::new(),
            outputs: Outputs::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn resource(&self, logical_name: &str) -> Option<&ResourceState> {
        self.resources.get(logical_name)
    }
}

/// Trait for stack state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state of a stack, if it has ever been applied.
    async fn load(&self, kind: StackKind, name: &str) -> Result<Option<StackState>>;

    /// Save (replace) the state of a stack.
    async fn save(&self, state: &StackState) -> Result<()>;

    /// Remove the state of a stack.
    async fn delete(&self, kind: StackKind, name: &str) -> Result<()>;

    /// List stored stacks.
    async fn list(&self) -> Result<Vec<Stack>>;
}
