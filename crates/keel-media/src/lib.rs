//! Media storage for Keel applications.
//!
//! Three interchangeable [`MediaStorage`](keel_core::storage::MediaStorage)
//! providers are available:
//! - [`LocalDiskStorage`] - files under a local directory, served by the app
//! - [`ObjectStoreStorage`] - a public object-store bucket
//! - [`HostedBlobStorage`] - a hosted blob service addressed by token
//!
//! [`StorageSelector`] picks one from configuration, once per process.

pub mod hosted_blob;
pub mod local;
pub mod object_store;
pub mod paths;
pub mod selector;

pub use hosted_blob::HostedBlobStorage;
pub use local::LocalDiskStorage;
pub use object_store::ObjectStoreStorage;
pub use selector::StorageSelector;
