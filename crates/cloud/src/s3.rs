//! S3 implementation of [`ObjectStore`].

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use quant_core::storage::{ObjectStore, StorageError};

/// Object store backed by Amazon S3 (or an S3-compatible endpoint).
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS credential chain
    /// (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_DEFAULT_REGION`,
    /// profiles, instance metadata).
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(S3Client::new(&config))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn read_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError> {
        let response = match self.client.get_object().bucket(bucket).key(path).send().await {
            Ok(response) => response,
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    return Err(StorageError::NotFound {
                        bucket: bucket.to_string(),
                        path: path.to_string(),
                    });
                }
                return Err(StorageError::Backend(format!(
                    "GetObject s3://{bucket}/{path}: {}",
                    DisplayErrorContext(&err)
                )));
            }
        };

        let bytes = response.body.collect().await.map_err(|e| {
            StorageError::Backend(format!("Reading body of s3://{bucket}/{path}: {e}"))
        })?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn write_object(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(path)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| {
                StorageError::Backend(format!(
                    "PutObject s3://{bucket}/{path}: {}",
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }
}
