//! Object store capability consumed by the indexer.
//!
//! One method per primitive request the store offers. Fallback policy,
//! timeouts and tag conventions live in [`crate::gateway::Gateway`];
//! implementations only translate requests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Range;
use std::time::Duration;
use thiserror::Error;

/// Flat user-metadata map as stored alongside an object.
pub type Tags = BTreeMap<String, String>;

/// Errors surfaced by the object store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Object store request failed: {0}")]
    Transport(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl StoreError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// Whether the error means the object is absent, as opposed to a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Stat snapshot of one stored object. Fetched fresh for every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescriptor {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub content_type: Option<String>,
    pub tags: Tags,
}

/// Primitive operations of an S3-compatible object store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether the bucket exists and is reachable.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Recursively list every object under `prefix`.
    ///
    /// Listings may omit `tags`; callers that need them must `stat`.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectDescriptor>, StoreError>;

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectDescriptor, StoreError>;

    /// Fetch `range` of the object. Ranges past the end are truncated.
    async fn get_range(&self, bucket: &str, key: &str, range: Range<u64>) -> Result<Bytes, StoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        tags: Tags,
    ) -> Result<(), StoreError>;

    /// Replace the object's tags in place without touching its bytes.
    async fn copy_with_tags(&self, bucket: &str, key: &str, tags: Tags) -> Result<(), StoreError>;
}
