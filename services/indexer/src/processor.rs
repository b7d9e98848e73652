//! Per-image indexing leg shared by the incremental and backfill paths.

use crate::aggregate::{folder_for_key, EntryChange, ImageMetadataEntry};
use crate::extractor::{extract, ExifRecord};
use crate::gateway::{Gateway, ImageTags};
use crate::repository::{FolderRepository, RepositoryError};
use crate::store::{ObjectDescriptor, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What indexing one image did (or, in dry-run, would do).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedImage {
    pub key: String,
    pub folder: String,
    pub change: EntryChange,
    pub exif: ExifRecord,
    pub persisted: bool,
}

pub struct ImageProcessor {
    gateway: Arc<Gateway>,
    repository: Arc<FolderRepository>,
}

impl ImageProcessor {
    pub fn new(gateway: Arc<Gateway>, repository: Arc<FolderRepository>) -> Self {
        Self { gateway, repository }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Aggregate entry for an image from its stat snapshot and EXIF record.
    pub fn build_entry(descriptor: &ObjectDescriptor, exif: ExifRecord, extracted_at: DateTime<Utc>) -> ImageMetadataEntry {
        ImageMetadataEntry {
            source_image: descriptor.key.clone(),
            extracted_at,
            file_size: descriptor.size,
            last_modified: descriptor.last_modified,
            etag: descriptor.etag.clone(),
            exif,
        }
    }

    /// Extract EXIF from `image_bytes`, upsert the folder aggregate and tag
    /// the image as processed.
    ///
    /// The aggregate is written before the image tag, so a tagged image is
    /// always present in its folder index. With `dry_run` every read and
    /// computation still happens but both writes are skipped.
    #[instrument(skip(self, descriptor, image_bytes), fields(key = %descriptor.key, size = image_bytes.len()))]
    pub async fn index(
        &self,
        descriptor: &ObjectDescriptor,
        image_bytes: &[u8],
        dry_run: bool,
    ) -> Result<IndexedImage, ProcessError> {
        let exif = extract(image_bytes);
        let now = Utc::now();
        let folder = folder_for_key(&descriptor.key).to_string();
        let entry = Self::build_entry(descriptor, exif.clone(), now);

        let outcome = if dry_run {
            self.repository
                .plan_upsert(&descriptor.bucket, &folder, entry)
                .await?
        } else {
            self.repository
                .upsert(&descriptor.bucket, &folder, entry)
                .await?
        };

        if !dry_run {
            let tags = ImageTags::from_record(&exif, now);
            self.gateway.mark_processed(descriptor, &tags).await?;
        }

        debug!(
            folder = %folder,
            has_exif = exif.has_exif,
            change = ?outcome.change,
            dry_run,
            "Image indexed"
        );

        Ok(IndexedImage {
            key: descriptor.key.clone(),
            folder,
            change: outcome.change,
            exif,
            persisted: outcome.persisted,
        })
    }
}
