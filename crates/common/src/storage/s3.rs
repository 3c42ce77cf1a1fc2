use super::{parse_s3_url, split_path, ObjectStore};
use crate::config::StorageConfig;
use crate::errors::{AppError, FetchError, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use aws_types::region::Region;
use std::time::Duration;
use tracing::debug;

/// S3 (or S3-compatible) object store
pub struct S3ObjectStore {
    client: Client,
    presign_expiry: Duration,
}

fn storage_err<E: std::error::Error>(what: &str, path: &str, err: E) -> AppError {
    AppError::Storage {
        message: format!("{} {} failed: {}", what, path, DisplayErrorContext(err)),
    }
}

impl S3ObjectStore {
    pub async fn from_config(config: &StorageConfig) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            presign_expiry: Duration::from_secs(config.presign_expiry_secs),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn presign(&self, url: &str) -> Result<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }

        let (bucket, key) = parse_s3_url(url).ok_or_else(|| FetchError::UnsupportedUrl {
            url: url.to_string(),
        })?;

        let presign_config = PresigningConfig::expires_in(self.presign_expiry).map_err(|e| {
            FetchError::Presign {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| FetchError::Presign {
                url: url.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        Ok(request.uri().to_string())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let (bucket, key) = split_path(path);

        if key.is_empty() {
            match self.client.head_bucket().bucket(bucket).send().await {
                Ok(_) => Ok(true),
                Err(e) => match e.into_service_error() {
                    err if err.is_not_found() => Ok(false),
                    err => Err(storage_err("head_bucket", path, err)),
                },
            }
        } else {
            match self.client.head_object().bucket(bucket).key(key).send().await {
                Ok(_) => Ok(true),
                Err(e) => match e.into_service_error() {
                    err if err.is_not_found() => Ok(false),
                    err => Err(storage_err("head_object", path, err)),
                },
            }
        }
    }

    async fn mkdir(&self, path: &str, region: &str) -> Result<()> {
        let (bucket, _) = split_path(path);
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit location constraint
        if region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| storage_err("create_bucket", path, e))?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let (bucket, key) = split_path(path);

        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) => {
                return match e.into_service_error() {
                    err if err.is_no_such_key() => Ok(None),
                    err => Err(storage_err("get_object", path, err)),
                }
            }
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| storage_err("read body of", path, e))?
            .into_bytes();

        debug!(path, size = bytes.len(), "Read object");
        Ok(Some(bytes.to_vec()))
    }

    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let (bucket, key) = split_path(path);
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| storage_err("put_object", path, e))?;

        debug!(path, size, "Wrote object");
        Ok(())
    }
}
