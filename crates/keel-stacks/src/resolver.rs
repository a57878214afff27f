//! Stack reference resolution.
//!
//! Application stacks never read foundation resources directly. They ask the
//! resolver for the foundation's published outputs, which are validated
//! against the output contract before anything else happens.

use keel_core::contract::{OutputContract, OutputKey, Outputs, require_keys};
use keel_core::stack::{Stack, StackKind, StackStatus};
use keel_core::state::StateStore;
use keel_core::Result;
use std::sync::Arc;
use tracing::debug;

/// Reads published foundation outputs from the state store.
#[derive(Clone)]
pub struct StackResolver {
    store: Arc<dyn StateStore>,
}

impl StackResolver {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Raw outputs of a foundation stack. A stack that was never built, or has
    /// been destroyed, publishes nothing.
    pub async fn outputs(&self, foundation: &str) -> Result<Outputs> {
        let stack = Stack::foundation(foundation)?;
        let state = self.store.load(StackKind::Foundation, &stack.name).await?;
        Ok(match state {
            Some(state) if state.status != StackStatus::Destroyed => state.outputs,
            _ => Outputs::new(),
        })
    }

    /// Resolve the contract of `foundation`, checking `required` keys in order first.
    ///
    /// Fails with `MissingOutput` naming the first absent or empty key.
    pub async fn resolve(&self, foundation: &str, required: &[OutputKey]) -> Result<OutputContract> {
        let outputs = self.outputs(foundation).await?;
        require_keys(foundation, &outputs, required)?;
        let contract = OutputContract::from_outputs(foundation, &outputs)?;
        debug!(foundation = %foundation, listener = %contract.listener_id, "Resolved foundation outputs");
        Ok(contract)
    }

    /// Resolve every key an application stack needs.
    pub async fn resolve_contract(&self, foundation: &str) -> Result<OutputContract> {
        self.resolve(foundation, &OutputKey::REQUIRED).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_backend::MemoryStateStore;
    use keel_core::Error;
    use keel_core::contract::OutputValue;
    use keel_core::state::StackState;

    async fn store_with(outputs: Outputs, status: StackStatus) -> Arc<dyn StateStore> {
        let store = Arc::new(MemoryStateStore::new());
        let mut state = StackState::new(Stack::foundation("foundation-prod").unwrap());
        state.status = status;
        state.outputs = outputs;
        store.save(&state).await.unwrap();
        store
    }

    fn full_outputs() -> Outputs {
        OutputKey::REQUIRED
            .iter()
            .map(|key| {
                let value = if key.is_list() {
                    OutputValue::List(vec!["subnet-1".to_string()])
                } else {
                    OutputValue::Text(format!("{}-value", key))
                };
                (key.as_str().to_string(), value)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_resolve_is_deterministic() {
        let resolver = StackResolver::new(store_with(full_outputs(), StackStatus::Ready).await);
        let first = resolver.resolve_contract("foundation-prod").await.unwrap();
        let second = resolver.resolve_contract("foundation-prod").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.stack, "foundation-prod");
    }

    #[tokio::test]
    async fn test_never_built_foundation_fails_on_first_key() {
        let resolver = StackResolver::new(Arc::new(MemoryStateStore::new()));
        let err = resolver.resolve_contract("nowhere").await.unwrap_err();
        assert!(
            matches!(err, Error::MissingOutput { ref stack, ref key } if stack == "nowhere" && key == "connectionStringHandle")
        );
    }

    #[tokio::test]
    async fn test_each_missing_key_is_reported() {
        for key in OutputKey::REQUIRED {
            let mut outputs = full_outputs();
            outputs.remove(key.as_str());
            let resolver = StackResolver::new(store_with(outputs, StackStatus::Ready).await);
            match resolver.resolve_contract("foundation-prod").await {
                Err(Error::MissingOutput { key: missing, .. }) => assert_eq!(missing, key.as_str()),
                other => panic!("expected MissingOutput for {}, got {:?}", key, other),
            }
        }
    }

    #[tokio::test]
    async fn test_requested_key_order_decides_which_is_reported() {
        let mut outputs = full_outputs();
        outputs.remove("listenerId");
        outputs.remove("clusterId");
        let resolver = StackResolver::new(store_with(outputs, StackStatus::Ready).await);
        let err = resolver
            .resolve("foundation-prod", &[OutputKey::ListenerId, OutputKey::ClusterId])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingOutput { key, .. } if key == "listenerId"));
    }

    #[tokio::test]
    async fn test_destroyed_foundation_publishes_nothing() {
        let resolver = StackResolver::new(store_with(full_outputs(), StackStatus::Destroyed).await);
        assert!(resolver.outputs("foundation-prod").await.unwrap().is_empty());
    }
}
