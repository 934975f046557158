use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("failed to upload {key}: {reason}")]
    Upload { key: String, reason: String },

    #[error("failed to delete {key}: {reason}")]
    Delete { key: String, reason: String },
}

/// Object storage for uploaded images
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the object, make it publicly readable and return its public URL.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, BlobError>;

    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    fn public_url(&self, key: &str) -> String;
}

pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| BlobError::Upload {
                key: key.to_string(),
                reason: DisplayErrorContext(e).to_string(),
            })?;

        // Buckets with object ownership enforced reject ACLs; the object is
        // still stored, so carry on.
        if let Err(e) = self
            .client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
        {
            tracing::warn!(
                "Failed to make {} public: {}",
                key,
                DisplayErrorContext(e)
            );
        }

        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::Delete {
                key: key.to_string(),
                reason: DisplayErrorContext(e).to_string(),
            })?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_url(&self.bucket, key)
    }
}

pub fn public_url(bucket: &str, key: &str) -> String {
    format!("https://{}.s3.amazonaws.com/{}", bucket, key)
}
