//! One-time media storage selection.

use keel_config::{MediaBackendConfig, MediaConfig};
use keel_core::storage::MediaStorage;
use keel_core::{Error, Result};
use std::sync::{Arc, OnceLock};
use tracing::info;

use crate::{HostedBlobStorage, LocalDiskStorage, ObjectStoreStorage};

/// Picks the media storage provider once and hands out the same instance afterwards.
///
/// Configuration changes after the first selection are not observed.
#[derive(Default)]
pub struct StorageSelector {
    selected: OnceLock<Arc<dyn MediaStorage>>,
}

impl StorageSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select from the process environment.
    pub fn select_from_env(&self) -> Result<Arc<dyn MediaStorage>> {
        self.select(|key| std::env::var(key).ok())
    }

    /// Select from a key lookup, or return the provider already selected.
    pub fn select<F>(&self, lookup: F) -> Result<Arc<dyn MediaStorage>>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(storage) = self.selected.get() {
            return Ok(storage.clone());
        }

        let config = MediaConfig::from_lookup(lookup).map_err(Error::from)?;
        let storage = build(&config)?;
        info!(provider = storage.name(), "Selected media storage");

        // A concurrent caller may have won; everyone gets the first stored provider.
        let _ = self.selected.set(storage);
        self.selected
            .get()
            .cloned()
            .ok_or_else(|| Error::Internal("media storage selection lost".to_string()))
    }

    /// The provider selected so far, if any.
    pub fn selected(&self) -> Option<Arc<dyn MediaStorage>> {
        self.selected.get().cloned()
    }
}

/// Construct the provider described by `config`.
pub fn build(config: &MediaConfig) -> Result<Arc<dyn MediaStorage>> {
    let storage: Arc<dyn MediaStorage> = match &config.backend {
        MediaBackendConfig::LocalDisk {
            root,
            public_prefix,
        } => Arc::new(LocalDiskStorage::new(root.clone(), public_prefix.clone())),
        MediaBackendConfig::ObjectStore { bucket, endpoint } => {
            Arc::new(ObjectStoreStorage::new(bucket.clone(), endpoint.clone()))
        }
        MediaBackendConfig::HostedBlob { token, api_url } => {
            Arc::new(HostedBlobStorage::new(token.clone(), api_url.clone())?)
        }
    };
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::media::{BLOB_READ_WRITE_TOKEN, MEDIA_BUCKET_NAME};

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_selects_by_signal() {
        let cases: [(&'static [(&str, &str)], &str); 3] = [
            (&[], "local"),
            (&[(MEDIA_BUCKET_NAME, "blog-media")], "object-store"),
            (&[(BLOB_READ_WRITE_TOKEN, "vercel_blob_rw_store_secret")], "hosted-blob"),
        ];
        for (pairs, expected) in cases {
            let selector = StorageSelector::new();
            assert_eq!(selector.select(lookup(pairs)).unwrap().name(), expected);
        }
    }

    #[test]
    fn test_both_signals_are_a_selection_error() {
        let selector = StorageSelector::new();
        let err = selector
            .select(lookup(&[
                (MEDIA_BUCKET_NAME, "blog-media"),
                (BLOB_READ_WRITE_TOKEN, "vercel_blob_rw_store_secret"),
            ]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::ProviderSelection(_)));
        assert!(selector.selected().is_none());
    }

    #[test]
    fn test_selection_is_fixed_after_first_use() {
        let selector = StorageSelector::new();
        let first = selector.select(lookup(&[])).unwrap();
        let second = selector
            .select(lookup(&[(MEDIA_BUCKET_NAME, "blog-media")]))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.name(), "local");
    }

    #[test]
    fn test_invalid_token_fails_selection() {
        let selector = StorageSelector::new();
        assert!(
            selector
                .select(lookup(&[(BLOB_READ_WRITE_TOKEN, "not-a-token")]))
                .is_err()
        );
    }
}
