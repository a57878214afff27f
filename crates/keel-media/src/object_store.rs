//! Object store media storage.
//!
//! Objects are written with a `public-read` ACL into the bucket the
//! foundation stack publishes as `mediaBucketName`. Requests are signed with
//! credentials from the default AWS provider chain, loaded on first use.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use bytes::Bytes;
use keel_core::storage::MediaStorage;
use keel_core::{Error, Result};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::paths::content_type_for;

/// Stores media in a public object-store bucket.
#[derive(Debug)]
pub struct ObjectStoreStorage {
    bucket: String,
    endpoint: Option<Url>,
    base_url: String,
    client: OnceCell<Client>,
}

impl ObjectStoreStorage {
    /// Address `bucket` at `https://{bucket}.s3.amazonaws.com`, or path-style under `endpoint`.
    pub fn new(bucket: impl Into<String>, endpoint: Option<Url>) -> Self {
        let bucket = bucket.into();
        let base_url = match &endpoint {
            Some(url) => format!("{}/{}", url.as_str().trim_end_matches('/'), bucket),
            None => format!("https://{}.s3.amazonaws.com", bucket),
        };
        Self {
            bucket,
            endpoint,
            base_url,
            client: OnceCell::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
                let mut builder = aws_sdk_s3::config::Builder::from(&shared);
                if let Some(endpoint) = &self.endpoint {
                    builder = builder
                        .endpoint_url(endpoint.as_str().trim_end_matches('/'))
                        .force_path_style(true);
                }
                Client::from_conf(builder.build())
            })
            .await
    }

    /// Object key behind one of this bucket's public URLs.
    fn key_for(&self, url: &str) -> Result<String> {
        let encoded = url
            .strip_prefix(&self.base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| {
                Error::InvalidInput(format!("'{}' is not an object in bucket {}", url, self.bucket))
            })?;
        let segments = encoded
            .split('/')
            .map(|segment| {
                urlencoding::decode(segment)
                    .map(|s| s.into_owned())
                    .map_err(|e| Error::InvalidInput(format!("bad object URL '{}': {}", url, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(segments.join("/"))
    }
}

fn encode_key(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl MediaStorage for ObjectStoreStorage {
    fn name(&self) -> &'static str {
        "object-store"
    }

    async fn upload(&self, path: &str, data: Bytes) -> Result<String> {
        if path.is_empty() {
            return Err(Error::InvalidInput("media path must not be empty".to_string()));
        }
        let size = data.len();
        self.client()
            .await
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type_for(path))
            .acl(ObjectCannedAcl::PublicRead)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                Error::Storage(format!(
                    "upload to {} failed: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;

        debug!(bucket = %self.bucket, path = %path, bytes = size, "Uploaded media object");
        Ok(self.url_for(path))
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let key = self.key_for(url)?;
        self.client()
            .await
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                Error::Storage(format!(
                    "delete from {} failed: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;
        debug!(bucket = %self.bucket, key = %key, "Deleted media object");
        Ok(())
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, encode_key(path))
    }
}
