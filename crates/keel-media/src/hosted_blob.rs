//! Hosted blob service media storage.
//!
//! Read-write tokens look like `vercel_blob_rw_<storeId>_<secret>`. The store
//! id determines the public host objects are served from.

use async_trait::async_trait;
use bytes::Bytes;
use keel_core::storage::MediaStorage;
use keel_core::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::paths::content_type_for;

const TOKEN_PREFIX: &str = "vercel_blob_rw_";
const API_VERSION: &str = "7";

#[derive(Debug, Deserialize)]
struct PutResponse {
    url: String,
}

/// Stores media in a hosted blob store.
#[derive(Clone)]
pub struct HostedBlobStorage {
    client: reqwest::Client,
    token: String,
    store_id: String,
    api_url: Url,
}

impl std::fmt::Debug for HostedBlobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedBlobStorage")
            .field("store_id", &self.store_id)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl HostedBlobStorage {
    pub fn new(token: impl Into<String>, api_url: Url) -> Result<Self> {
        let token = token.into();
        let store_id = parse_store_id(&token)?;
        Ok(Self {
            client: reqwest::Client::new(),
            token,
            store_id,
            api_url,
        })
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    fn api(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.as_str().trim_end_matches('/'), path)
    }
}

fn parse_store_id(token: &str) -> Result<String> {
    token
        .strip_prefix(TOKEN_PREFIX)
        .and_then(|rest| rest.split_once('_'))
        .map(|(store_id, _)| store_id.to_ascii_lowercase())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            Error::InvalidInput("blob token is not a read-write token".to_string())
        })
}

#[async_trait]
impl MediaStorage for HostedBlobStorage {
    fn name(&self) -> &'static str {
        "hosted-blob"
    }

    async fn upload(&self, path: &str, data: Bytes) -> Result<String> {
        let size = data.len();
        let response = self
            .client
            .put(self.api(path))
            .bearer_auth(&self.token)
            .header("x-api-version", API_VERSION)
            .header("x-content-type", content_type_for(path))
            .header("x-add-random-suffix", "0")
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("blob upload failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!(
                "blob upload failed with {}: {}",
                status, text
            )));
        }

        let body: PutResponse = response
            .json()
            .await
            .map_err(|e| Error::Storage(format!("unexpected blob response: {}", e)))?;
        debug!(store = %self.store_id, path = %path, bytes = size, "Uploaded media blob");
        Ok(body.url)
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let response = self
            .client
            .post(self.api("delete"))
            .bearer_auth(&self.token)
            .header("x-api-version", API_VERSION)
            .json(&json!({ "urls": [url] }))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("blob delete failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "blob delete failed with {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "https://{}.public.blob.vercel-storage.com/{}",
            self.store_id, path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> Url {
        Url::parse("https://blob.vercel-storage.com").unwrap()
    }

    #[test]
    fn test_store_id_comes_from_token() {
        let storage = HostedBlobStorage::new("vercel_blob_rw_AbC123_s3cr3t", api()).unwrap();
        assert_eq!(storage.store_id(), "abc123");
        assert_eq!(
            storage.url_for("thumbnails/p1-1.webp"),
            "https://abc123.public.blob.vercel-storage.com/thumbnails/p1-1.webp"
        );
        assert!(!format!("{:?}", storage).contains("s3cr3t"));
    }

    #[test]
    fn test_malformed_token_is_rejected() {
        for token in ["", "token", "vercel_blob_rw_", "vercel_blob_rw__x"] {
            assert!(HostedBlobStorage::new(token, api()).is_err(), "{}", token);
        }
    }
}
