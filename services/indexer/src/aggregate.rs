//! Per-folder metadata index persisted as one JSON object.

use crate::extractor::ExifRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Folder for keys without a path separator.
pub const ROOT_FOLDER: &str = "root";

/// Folder an object key belongs to: its first path segment.
pub fn folder_for_key(key: &str) -> &str {
    match key.split_once('/') {
        Some((folder, _)) if !folder.is_empty() => folder,
        _ => ROOT_FOLDER,
    }
}

/// Object key of a folder's aggregate: `{folder}/{folder}.json`.
pub fn aggregate_key(folder: &str) -> String {
    format!("{}/{}.json", folder, folder)
}

/// Metadata recorded for one image inside its folder aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadataEntry {
    pub source_image: String,
    pub extracted_at: DateTime<Utc>,
    pub file_size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub exif: ExifRecord,
}

/// How an upsert changed the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryChange {
    Inserted,
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderAggregate {
    pub folder_name: String,
    pub generated_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub total_images: usize,
    #[serde(default)]
    pub images: Vec<ImageMetadataEntry>,
}

impl FolderAggregate {
    /// Empty aggregate for a folder seen for the first time.
    pub fn new(folder_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            folder_name: folder_name.to_string(),
            generated_at: now,
            last_updated: now,
            total_images: 0,
            images: Vec::new(),
        }
    }

    pub fn entry(&self, source_image: &str) -> Option<&ImageMetadataEntry> {
        self.images.iter().find(|e| e.source_image == source_image)
    }

    /// Replace the entry with the same `source_image` in place, or append.
    ///
    /// Also drops any stale duplicates of that key left by older writers,
    /// so at most one entry per key survives.
    pub fn upsert_entry(&mut self, entry: ImageMetadataEntry, now: DateTime<Utc>) -> EntryChange {
        let change = match self
            .images
            .iter()
            .position(|e| e.source_image == entry.source_image)
        {
            Some(index) => {
                let key = entry.source_image.clone();
                self.images[index] = entry;
                let mut seen = false;
                self.images.retain(|e| {
                    if e.source_image != key {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
                EntryChange::Replaced
            }
            None => {
                self.images.push(entry);
                EntryChange::Inserted
            }
        };

        self.total_images = self.images.len();
        self.last_updated = now;
        change
    }

    /// Whether the stored count matches the entry list.
    pub fn is_consistent(&self) -> bool {
        self.total_images == self.images.len()
    }
}
