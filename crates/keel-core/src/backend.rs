//! Cloud backend abstraction.
//!
//! A backend is the external system that turns resolved resources into real
//! ones. It identifies resources by kind and physical name, so upserting the
//! same resource twice converges on the same underlying object.

use async_trait::async_trait;

use crate::Result;
use crate::resource::{ResolvedResource, ResourceState};
use crate::routing::RoutingRule;

/// Trait for cloud backends.
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Create or update a resource. `prior` is the state recorded by the last apply, if any.
    async fn upsert(
        &self,
        resource: &ResolvedResource,
        prior: Option<&ResourceState>,
    ) -> Result<ResourceState>;

    /// Delete a resource. Deleting something that no longer exists is not an error.
    async fn delete(&self, state: &ResourceState) -> Result<()>;

    /// Rules currently attached to a listener.
    async fn listener_rules(&self, listener_id: &str) -> Result<Vec<RoutingRule>>;
}
