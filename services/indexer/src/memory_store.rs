//! In-process object store.
//!
//! Behaves like a single-node S3: request-level atomicity, recursive prefix
//! listing, user metadata replaced wholesale on copy. Switches allow tests to
//! simulate stores without range support, failing objects and slow requests.

use crate::store::{ObjectDescriptor, ObjectStore, StoreError, Tags};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: String,
    tags: Tags,
    last_modified: DateTime<Utc>,
    etag: String,
}

/// Request counters, for asserting which code path served a read.
#[derive(Debug, Default)]
pub struct RequestCounts {
    pub range_gets: AtomicU64,
    pub full_gets: AtomicU64,
    pub puts: AtomicU64,
    pub copies: AtomicU64,
}

#[derive(Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    reject_ranges: AtomicBool,
    failing_keys: RwLock<HashSet<String>>,
    latency: RwLock<Option<Duration>>,
    counts: RequestCounts,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor with one empty bucket.
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::new();
        store.create_bucket(bucket);
        store
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.write().entry(bucket.to_string()).or_default();
    }

    /// Store an object directly, bypassing latency and fault injection.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>, tags: Tags) {
        let body = body.into();
        let object = StoredObject {
            etag: etag_for(&body),
            content_type: content_type_for(key).to_string(),
            body,
            tags,
            last_modified: Utc::now(),
        };
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    /// Current body and tags of an object, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<(Bytes, Tags)> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| (o.body.clone(), o.tags.clone()))
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make ranged reads fail as if the store did not support them.
    pub fn set_reject_ranges(&self, reject: bool) {
        self.reject_ranges.store(reject, Ordering::SeqCst);
    }

    /// Make every request touching `key` fail with a transport error.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.write().insert(key.to_string());
    }

    /// Delay every request by `latency` before it touches state.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    pub fn counts(&self) -> &RequestCounts {
        &self.counts
    }

    async fn enter(&self, key: &str) -> Result<(), StoreError> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing_keys.read().contains(key) {
            return Err(StoreError::Transport(format!("injected failure for {}", key)));
        }
        Ok(())
    }

    fn read_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(bucket, key))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.buckets.read().contains_key(bucket))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectDescriptor>, StoreError> {
        self.enter(prefix).await?;
        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;

        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| describe(bucket, key, object, false))
            .collect())
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectDescriptor, StoreError> {
        self.enter(key).await?;
        let object = self.read_object(bucket, key)?;
        Ok(describe(bucket, key, &object, true))
    }

    async fn get_range(&self, bucket: &str, key: &str, range: Range<u64>) -> Result<Bytes, StoreError> {
        self.counts.range_gets.fetch_add(1, Ordering::SeqCst);
        self.enter(key).await?;
        if self.reject_ranges.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("range requests not supported".to_string()));
        }

        let object = self.read_object(bucket, key)?;
        let len = object.body.len();
        let start = (range.start as usize).min(len);
        let end = (range.end as usize).min(len);
        Ok(object.body.slice(start..end.max(start)))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.counts.full_gets.fetch_add(1, Ordering::SeqCst);
        self.enter(key).await?;
        Ok(self.read_object(bucket, key)?.body)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        tags: Tags,
    ) -> Result<(), StoreError> {
        self.counts.puts.fetch_add(1, Ordering::SeqCst);
        self.enter(key).await?;

        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                etag: etag_for(&body),
                body,
                content_type: content_type.to_string(),
                tags,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn copy_with_tags(&self, bucket: &str, key: &str, tags: Tags) -> Result<(), StoreError> {
        self.counts.copies.fetch_add(1, Ordering::SeqCst);
        self.enter(key).await?;

        let mut buckets = self.buckets.write();
        let object = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(bucket, key))?;
        object.tags = tags;
        object.last_modified = Utc::now();
        Ok(())
    }
}

fn describe(bucket: &str, key: &str, object: &StoredObject, with_tags: bool) -> ObjectDescriptor {
    ObjectDescriptor {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size: object.body.len() as u64,
        last_modified: object.last_modified,
        etag: object.etag.clone(),
        content_type: Some(object.content_type.clone()),
        tags: if with_tags { object.tags.clone() } else { Tags::new() },
    }
}

fn etag_for(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

fn content_type_for(key: &str) -> &'static str {
    let lower = key.to_lowercase();
    match lower.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("heic") | Some("heif") => "image/heif",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
