//! EXIF Indexer
//!
//! Maintains a per-folder index of the capture metadata embedded in images
//! stored in an S3-compatible bucket. Each folder gets one JSON aggregate,
//! `{folder}/{folder}.json`, holding one entry per image, and each indexed
//! image is tagged so later runs can skip it.
//!
//! ## Entry points
//!
//! - **Incremental**: [`IncrementalUpdater::on_image_stored`] indexes an image
//!   right after it was uploaded. Best effort, never fails the upload.
//! - **Backfill**: [`BackfillDriver::run`] rescans a bucket prefix in batches,
//!   skipping images that already carry the processing tag. Supports dry-run.
//!
//! ## Architecture
//!
//! ```text
//!  Upload hook              Backfill (exif-backfill)
//! ┌──────────────┐         ┌──────────────┐
//! │ Incremental  │         │ Backfill     │── list / stat / ranged get
//! │ Updater      │         │ Driver       │
//! └──────────────┘         └──────────────┘
//!        │                        │
//!        └──────────┬─────────────┘
//!                   ▼
//!           ┌──────────────┐       ┌──────────────┐
//!           │ Image        │──────▶│ EXIF         │
//!           │ Processor    │       │ Extractor    │
//!           └──────────────┘       └──────────────┘
//!                   │
//!                   ▼
//!           ┌──────────────┐       ┌──────────────┐       ┌──────────────┐
//!           │ Folder       │──────▶│ Gateway      │──────▶│ ObjectStore  │
//!           │ Repository   │       │ (timeouts,   │       │ (S3 / memory)│
//!           └──────────────┘       │  tags)       │       └──────────────┘
//!                                  └──────────────┘
//! ```
//!
//! Writes to a folder aggregate are serialized per folder inside the
//! repository; the backfill driver additionally never schedules two images
//! of one folder concurrently.

pub mod aggregate;
pub mod backfill;
pub mod candidate;
pub mod config;
pub mod extractor;
pub mod gateway;
pub mod memory_store;
pub mod normalize;
pub mod processor;
pub mod repository;
pub mod s3_store;
pub mod store;
pub mod updater;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use aggregate::{aggregate_key, folder_for_key, EntryChange, FolderAggregate, ImageMetadataEntry};
pub use backfill::{
    BackfillDriver, BackfillError, BackfillOptions, BackfillReport, BackfillState, RunStatistics, RunSummary,
};
pub use candidate::{CandidateDecision, CandidateFilter};
pub use config::{Config, ConfigError};
pub use extractor::{extract, ExifRecord};
pub use gateway::{AggregateTags, Gateway, ImageTags};
pub use memory_store::MemoryStore;
pub use normalize::GpsCoordinates;
pub use processor::{ImageProcessor, IndexedImage, ProcessError};
pub use repository::{FolderRepository, RepositoryError, UpsertOutcome};
pub use s3_store::S3Store;
pub use store::{ObjectDescriptor, ObjectStore, StoreError, Tags};
pub use updater::IncrementalUpdater;
