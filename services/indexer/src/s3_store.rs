use crate::config::S3Config;
use crate::store::{ObjectDescriptor, ObjectStore, StoreError, Tags};
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::types::MetadataDirective;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, info, instrument};

/// S3/MinIO implementation of the object store capability
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    /// Create a new S3 store client
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "S3 store initialized"
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(transport("head_bucket", e))
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectDescriptor>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error()
                        .map(|e| e.is_no_such_bucket())
                        .unwrap_or(false)
                    {
                        StoreError::BucketNotFound(bucket.to_string())
                    } else {
                        transport("list_objects_v2", e)
                    }
                })?;

            for obj in response.contents() {
                let Some(key) = obj.key() else { continue };
                objects.push(ObjectDescriptor {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: to_chrono(obj.last_modified()),
                    etag: obj.e_tag().unwrap_or_default().to_string(),
                    content_type: None,
                    tags: Tags::new(),
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(count = objects.len(), "Listed objects");
        Ok(objects)
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectDescriptor, StoreError> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    StoreError::not_found(bucket, key)
                } else {
                    transport("head_object", e)
                }
            })?;

        let tags = response
            .metadata()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Ok(ObjectDescriptor {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            last_modified: to_chrono(response.last_modified()),
            etag: response.e_tag().unwrap_or_default().to_string(),
            content_type: response.content_type().map(String::from),
            tags,
        })
    }

    async fn get_range(&self, bucket: &str, key: &str, range: Range<u64>) -> Result<Bytes, StoreError> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        // HTTP byte ranges are inclusive
        let header = format!("bytes={}-{}", range.start, range.end - 1);
        self.fetch(bucket, key, Some(header)).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.fetch(bucket, key, None).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        tags: Tags,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .set_metadata(Some(tags.into_iter().collect::<HashMap<_, _>>()))
            .send()
            .await
            .map_err(|e| transport("put_object", e))?;

        Ok(())
    }

    async fn copy_with_tags(&self, bucket: &str, key: &str, tags: Tags) -> Result<(), StoreError> {
        // REPLACE resets the content type unless it is sent again
        let current = self.stat(bucket, key).await?;

        let mut request = self
            .client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source(bucket, key))
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(tags.into_iter().collect::<HashMap<_, _>>()));

        if let Some(content_type) = current.content_type {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .map_err(|e| transport("copy_object", e))?;

        Ok(())
    }
}

impl S3Store {
    async fn fetch(&self, bucket: &str, key: &str, range: Option<String>) -> Result<Bytes, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(range)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StoreError::not_found(bucket, key)
                } else {
                    transport("get_object", e)
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transport(format!("get_object body: {}", e)))?;

        Ok(data.into_bytes())
    }
}

fn transport<E>(operation: &str, error: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Transport(format!("{}: {}", operation, DisplayErrorContext(&error)))
}

fn to_chrono(value: Option<&AwsDateTime>) -> DateTime<Utc> {
    value
        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Build the `x-amz-copy-source` value, percent-encoding the key
fn copy_source(bucket: &str, key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    format!("{}/{}", bucket, encoded)
}
