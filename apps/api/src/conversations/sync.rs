//! Remote object storage for conversation files.
//!
//! Only conversation history is ever mirrored remotely. Recommendations stay local
//! to each instance and converge by being regenerated.

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use thiserror::Error;

use crate::config::S3Config;
use crate::storage::user_token;

#[derive(Debug, Error)]
#[error("Remote storage error: {0}")]
pub struct SyncError(pub String);

/// Minimal object store surface needed by the conversation cache.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns `None` when the object does not exist.
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>, SyncError>;

    async fn push(&self, key: &str, body: Bytes) -> Result<(), SyncError>;
}

/// Object key holding a user's full conversation file.
pub fn conversations_key(prefix: &str, user: &str) -> String {
    format!("{prefix}/conversations/{}.json", user_token(user))
}

/// S3 (or any S3-compatible endpoint) backed [`RemoteStore`].
pub struct S3RemoteStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3RemoteStore {
    pub async fn connect(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "writeback-static",
        );

        let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&config.endpoint)
            .load()
            .await;

        Self {
            client: aws_sdk_s3::Client::new(&s3_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl RemoteStore for S3RemoteStore {
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>, SyncError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let err = err.into_service_error();
                if err.is_no_such_key() {
                    return Ok(None);
                }
                return Err(SyncError(format!("GET s3://{}/{key}: {err}", self.bucket)));
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| SyncError(format!("reading s3://{}/{key}: {e}", self.bucket)))?;
        Ok(Some(data.into_bytes()))
    }

    async fn push(&self, key: &str, body: Bytes) -> Result<(), SyncError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| SyncError(format!("PUT s3://{}/{key}: {e}", self.bucket)))?;
        Ok(())
    }
}
