//! Media storage abstraction.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Trait for media storage backends.
///
/// Every variant exposes the same capability set, so callers never need to
/// know which one is active.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Store `data` at `path` and return its public URL.
    async fn upload(&self, path: &str, data: Bytes) -> Result<String>;

    /// Delete a previously uploaded object by its public URL.
    async fn delete(&self, url: &str) -> Result<()>;

    /// Public URL an object stored at `path` is served from.
    fn url_for(&self, path: &str) -> String;
}
