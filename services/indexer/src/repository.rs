//! Folder aggregate repository.
//!
//! Owns the read-modify-write of `{folder}/{folder}.json`. Every writer,
//! incremental or backfill, goes through [`FolderRepository::upsert`], which
//! holds the folder's lock for the whole cycle so concurrent upserts to the
//! same folder cannot drop each other's entries.

use crate::aggregate::{aggregate_key, EntryChange, FolderAggregate, ImageMetadataEntry};
use crate::gateway::{AggregateTags, Gateway};
use crate::store::StoreError;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, instrument};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to serialize folder aggregate: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of a single upsert.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub aggregate: FolderAggregate,
    pub change: EntryChange,
    /// The stored aggregate was unreadable and has been rebuilt from scratch.
    pub recreated_from_corrupt: bool,
    /// Whether the aggregate was written back (false for planned upserts).
    pub persisted: bool,
}

/// Per-folder async mutexes, created on demand and dropped once unused.
#[derive(Default)]
pub struct FolderLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl FolderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, folder_key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock();
            match locks.get(folder_key).and_then(Weak::upgrade) {
                Some(mutex) => mutex,
                None => {
                    locks.retain(|_, lock| lock.strong_count() > 0);
                    let mutex = Arc::new(AsyncMutex::new(()));
                    locks.insert(folder_key.to_string(), Arc::downgrade(&mutex));
                    mutex
                }
            }
        };
        mutex.lock_owned().await
    }

    /// Number of folders with a live lock.
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }
}

pub struct FolderRepository {
    gateway: Arc<Gateway>,
    locks: FolderLocks,
}

impl FolderRepository {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            locks: FolderLocks::new(),
        }
    }

    /// Insert or replace `entry` in the folder's aggregate and persist it.
    #[instrument(skip(self, entry), fields(source_image = %entry.source_image))]
    pub async fn upsert(
        &self,
        bucket: &str,
        folder: &str,
        entry: ImageMetadataEntry,
    ) -> Result<UpsertOutcome, RepositoryError> {
        self.apply(bucket, folder, entry, true).await
    }

    /// Compute the upsert without writing anything back.
    #[instrument(skip(self, entry), fields(source_image = %entry.source_image))]
    pub async fn plan_upsert(
        &self,
        bucket: &str,
        folder: &str,
        entry: ImageMetadataEntry,
    ) -> Result<UpsertOutcome, RepositoryError> {
        self.apply(bucket, folder, entry, false).await
    }

    /// Read the folder's aggregate, if one exists and parses.
    pub async fn load(&self, bucket: &str, folder: &str) -> Result<Option<FolderAggregate>, RepositoryError> {
        let key = aggregate_key(folder);
        Ok(self
            .gateway
            .try_get_object(bucket, &key)
            .await?
            .and_then(|body| serde_json::from_slice(&body).ok()))
    }

    async fn apply(
        &self,
        bucket: &str,
        folder: &str,
        entry: ImageMetadataEntry,
        persist: bool,
    ) -> Result<UpsertOutcome, RepositoryError> {
        let started = Instant::now();
        let _guard = self.locks.lock(&format!("{}/{}", bucket, folder)).await;

        let key = aggregate_key(folder);
        let now = Utc::now();
        let mut recreated_from_corrupt = false;

        let mut aggregate = match self.gateway.try_get_object(bucket, &key).await? {
            None => {
                debug!(folder = %folder, "No aggregate yet, creating");
                FolderAggregate::new(folder, now)
            }
            Some(body) => match serde_json::from_slice::<FolderAggregate>(&body) {
                Ok(aggregate) => aggregate,
                Err(e) => {
                    error!(
                        folder = %folder,
                        key = %key,
                        error = %e,
                        data_loss_risk = true,
                        "Folder aggregate is corrupt, rebuilding it; previous entries are lost"
                    );
                    metrics::counter!("indexer.aggregate.corrupt").increment(1);
                    recreated_from_corrupt = true;
                    FolderAggregate::new(folder, now)
                }
            },
        };

        let change = aggregate.upsert_entry(entry, now);

        if persist {
            let body = serde_json::to_vec_pretty(&aggregate)?;
            let tags = AggregateTags {
                folder_name: aggregate.folder_name.clone(),
                image_count: aggregate.total_images,
                last_updated: aggregate.last_updated,
            };
            self.gateway
                .put_aggregate(bucket, &key, Bytes::from(body), &tags)
                .await?;
            metrics::histogram!("indexer.upsert.duration_seconds")
                .record(started.elapsed().as_secs_f64());
        }

        debug!(
            folder = %folder,
            change = ?change,
            total_images = aggregate.total_images,
            persisted = persist,
            "Folder aggregate upserted"
        );

        Ok(UpsertOutcome {
            aggregate,
            change,
            recreated_from_corrupt,
            persisted: persist,
        })
    }
}
