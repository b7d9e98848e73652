//! Object store gateway.
//!
//! Wraps an [`ObjectStore`] with per-request timeouts, the ranged header
//! fetch with full-object fallback, and the conversion between typed
//! metadata and the store's flat string tags. Nothing past this module
//! deals with raw tag maps.

use crate::extractor::ExifRecord;
use crate::store::{ObjectDescriptor, ObjectStore, StoreError, Tags};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default size of the ranged header fetch.
pub const DEFAULT_HEADER_BYTES: u64 = 64 * 1024;

/// Presence of this tag marks an image as already indexed.
pub const TAG_HAS_EXIF: &str = "has-exif";
pub const TAG_DATE_TAKEN: &str = "exif-date-taken";
pub const TAG_PROCESSED_AT: &str = "exif-processed-at";

pub const TAG_FOLDER_NAME: &str = "folder-name";
pub const TAG_IMAGE_COUNT: &str = "image-count";
pub const TAG_LAST_UPDATED: &str = "last-updated";
pub const TAG_CREATED_BY: &str = "created-by";

const CREATED_BY: &str = "exif-indexer";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Per-image processing tags.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTags {
    pub has_exif: bool,
    pub date_taken: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
}

impl ImageTags {
    pub fn from_record(record: &ExifRecord, processed_at: DateTime<Utc>) -> Self {
        Self {
            has_exif: record.has_exif,
            date_taken: record.date_taken,
            processed_at,
        }
    }

    /// Existing tags with the processing tags laid over them.
    pub fn merge_into(&self, existing: &Tags) -> Tags {
        let mut merged = existing.clone();
        merged.insert(TAG_HAS_EXIF.to_string(), self.has_exif.to_string());
        merged.insert(
            TAG_PROCESSED_AT.to_string(),
            self.processed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        match self.date_taken {
            Some(date) => {
                merged.insert(
                    TAG_DATE_TAKEN.to_string(),
                    date.to_rfc3339_opts(SecondsFormat::Secs, true),
                );
            }
            None => {
                merged.remove(TAG_DATE_TAKEN);
            }
        }
        merged
    }

    /// Whether an object was already indexed, judged by tag presence alone.
    pub fn is_processed(tags: &Tags) -> bool {
        tags.contains_key(TAG_HAS_EXIF)
    }
}

/// Advisory summary tags written alongside a folder aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTags {
    pub folder_name: String,
    pub image_count: usize,
    pub last_updated: DateTime<Utc>,
}

impl AggregateTags {
    pub fn to_tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert(TAG_FOLDER_NAME.to_string(), self.folder_name.clone());
        tags.insert(TAG_IMAGE_COUNT.to_string(), self.image_count.to_string());
        tags.insert(
            TAG_LAST_UPDATED.to_string(),
            self.last_updated.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        tags.insert(TAG_CREATED_BY.to_string(), CREATED_BY.to_string());
        tags
    }
}

/// Store access with bounded request time.
pub struct Gateway {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl Gateway {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn timed<T, F>(&self, operation: &'static str, request: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| StoreError::Timeout {
                operation,
                after: self.timeout,
            })?
    }

    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        self.timed("bucket_exists", self.store.bucket_exists(bucket))
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectDescriptor>, StoreError> {
        // Spans many paginated requests, so the per-request timeout does not apply
        self.store.list(bucket, prefix).await
    }

    #[instrument(skip(self))]
    pub async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectDescriptor, StoreError> {
        self.timed("stat", self.store.stat(bucket, key)).await
    }

    /// First `limit` bytes of an object, or the whole object if the ranged
    /// request fails for any reason.
    #[instrument(skip(self))]
    pub async fn fetch_header_bytes(&self, bucket: &str, key: &str, limit: u64) -> Result<Bytes, StoreError> {
        match self
            .timed("get_range", self.store.get_range(bucket, key, 0..limit))
            .await
        {
            Ok(bytes) => {
                debug!(size = bytes.len(), "Fetched header bytes");
                Ok(bytes)
            }
            Err(e) => {
                warn!(error = %e, "Ranged fetch failed, falling back to full object");
                metrics::counter!("indexer.header_fetch.fallback").increment(1);
                self.get_object(bucket, key).await
            }
        }
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.timed("get", self.store.get(bucket, key)).await
    }

    /// Full object body, with absence reported as `None` rather than an error.
    pub async fn try_get_object(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, StoreError> {
        match self.get_object(bucket, key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a folder aggregate body with its summary tags.
    #[instrument(skip(self, body, tags), fields(size = body.len()))]
    pub async fn put_aggregate(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        tags: &AggregateTags,
    ) -> Result<(), StoreError> {
        self.timed(
            "put",
            self.store
                .put(bucket, key, body, JSON_CONTENT_TYPE, tags.to_tags()),
        )
        .await
    }

    /// Replace an object's tags without rewriting its bytes.
    #[instrument(skip(self, merged_tags))]
    pub async fn upsert_metadata(&self, bucket: &str, key: &str, merged_tags: Tags) -> Result<(), StoreError> {
        self.timed("copy_with_tags", self.store.copy_with_tags(bucket, key, merged_tags))
            .await
    }

    /// Record processing tags on an image, keeping its unrelated tags.
    pub async fn mark_processed(&self, descriptor: &ObjectDescriptor, tags: &ImageTags) -> Result<(), StoreError> {
        self.upsert_metadata(&descriptor.bucket, &descriptor.key, tags.merge_into(&descriptor.tags))
            .await
    }
}
