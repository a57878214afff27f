//! Media storage configuration.
//!
//! The storage backend is chosen purely from which configuration values are
//! present:
//! - `MEDIA_BUCKET_NAME` selects the object store
//! - `BLOB_READ_WRITE_TOKEN` selects the hosted blob service
//! - neither selects local disk (`MEDIA_LOCAL_ROOT`, `MEDIA_PUBLIC_PREFIX`)
//!
//! Both signals at once is a configuration error, never resolved by precedence.

use crate::{ConfigError, ConfigResult};
use std::path::PathBuf;
use url::Url;

pub const MEDIA_BUCKET_NAME: &str = "MEDIA_BUCKET_NAME";
pub const MEDIA_OBJECT_ENDPOINT: &str = "MEDIA_OBJECT_ENDPOINT";
pub const BLOB_READ_WRITE_TOKEN: &str = "BLOB_READ_WRITE_TOKEN";
pub const BLOB_API_URL: &str = "BLOB_API_URL";
pub const MEDIA_LOCAL_ROOT: &str = "MEDIA_LOCAL_ROOT";
pub const MEDIA_PUBLIC_PREFIX: &str = "MEDIA_PUBLIC_PREFIX";

const DEFAULT_LOCAL_ROOT: &str = "public/media";
const DEFAULT_PUBLIC_PREFIX: &str = "/media";
const DEFAULT_BLOB_API_URL: &str = "https://blob.vercel-storage.com";

/// Which backend to use, with its settings.
#[derive(Clone, PartialEq, Eq)]
pub enum MediaBackendConfig {
    LocalDisk {
        root: PathBuf,
        public_prefix: String,
    },
    ObjectStore {
        bucket: String,
        /// S3-compatible endpoint used path-style instead of `https://{bucket}.s3.amazonaws.com`.
        endpoint: Option<Url>,
    },
    HostedBlob {
        token: String,
        api_url: Url,
    },
}

impl std::fmt::Debug for MediaBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaBackendConfig::LocalDisk {
                root,
                public_prefix,
            } => f
                .debug_struct("LocalDisk")
                .field("root", root)
                .field("public_prefix", public_prefix)
                .finish(),
            MediaBackendConfig::ObjectStore { bucket, endpoint } => f
                .debug_struct("ObjectStore")
                .field("bucket", bucket)
                .field("endpoint", endpoint)
                .finish(),
            MediaBackendConfig::HostedBlob { api_url, .. } => f
                .debug_struct("HostedBlob")
                .field("token", &"[redacted]")
                .field("api_url", api_url)
                .finish(),
        }
    }
}

/// Media storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConfig {
    pub backend: MediaBackendConfig,
}

impl MediaConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Empty values count as absent.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bucket = get(MEDIA_BUCKET_NAME);
        let token = get(BLOB_READ_WRITE_TOKEN);

        let backend = match (bucket, token) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Conflict(format!(
                    "both {} and {} are set; configure exactly one media backend",
                    MEDIA_BUCKET_NAME, BLOB_READ_WRITE_TOKEN
                )));
            }
            (Some(bucket), None) => MediaBackendConfig::ObjectStore {
                bucket,
                endpoint: get(MEDIA_OBJECT_ENDPOINT)
                    .map(|raw| parse_url(MEDIA_OBJECT_ENDPOINT, &raw))
                    .transpose()?,
            },
            (None, Some(token)) => {
                let api_url = get(BLOB_API_URL).unwrap_or_else(|| DEFAULT_BLOB_API_URL.to_string());
                MediaBackendConfig::HostedBlob {
                    token,
                    api_url: parse_url(BLOB_API_URL, &api_url)?,
                }
            }
            (None, None) => MediaBackendConfig::LocalDisk {
                root: PathBuf::from(
                    get(MEDIA_LOCAL_ROOT).unwrap_or_else(|| DEFAULT_LOCAL_ROOT.to_string()),
                ),
                public_prefix: get(MEDIA_PUBLIC_PREFIX)
                    .unwrap_or_else(|| DEFAULT_PUBLIC_PREFIX.to_string()),
            },
        };

        Ok(Self { backend })
    }
}

fn parse_url(field: &str, raw: &str) -> ConfigResult<Url> {
    Url::parse(raw).map_err(|e| ConfigError::invalid(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_no_signal_selects_local_disk() {
        let config = MediaConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(
            config.backend,
            MediaBackendConfig::LocalDisk {
                root: PathBuf::from("public/media"),
                public_prefix: "/media".to_string(),
            }
        );
    }

    #[test]
    fn test_bucket_selects_object_store() {
        let config = MediaConfig::from_lookup(lookup(&[(MEDIA_BUCKET_NAME, "acme-media")])).unwrap();
        assert!(matches!(
            config.backend,
            MediaBackendConfig::ObjectStore { ref bucket, endpoint: None } if bucket == "acme-media"
        ));
    }

    #[test]
    fn test_token_selects_hosted_blob() {
        let config =
            MediaConfig::from_lookup(lookup(&[(BLOB_READ_WRITE_TOKEN, "vercel_blob_rw_abc_xyz")]))
                .unwrap();
        assert!(matches!(config.backend, MediaBackendConfig::HostedBlob { .. }));
        assert!(!format!("{:?}", config).contains("vercel_blob_rw_abc_xyz"));
    }

    #[test]
    fn test_both_signals_conflict() {
        let err = MediaConfig::from_lookup(lookup(&[
            (MEDIA_BUCKET_NAME, "acme-media"),
            (BLOB_READ_WRITE_TOKEN, "token"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Conflict(_)));
    }

    #[test]
    fn test_empty_value_counts_as_absent() {
        let config = MediaConfig::from_lookup(lookup(&[(MEDIA_BUCKET_NAME, "")])).unwrap();
        assert!(matches!(config.backend, MediaBackendConfig::LocalDisk { .. }));
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let err = MediaConfig::from_lookup(lookup(&[
            (MEDIA_BUCKET_NAME, "acme-media"),
            (MEDIA_OBJECT_ENDPOINT, "not a url"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
