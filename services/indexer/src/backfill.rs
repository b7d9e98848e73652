//! Bulk backfill over an existing bucket.
//!
//! A run lists every object under a prefix, keeps the image candidates,
//! and indexes them in fixed-size batches. Batches run one after another;
//! inside a batch, items are grouped by folder and the groups run
//! concurrently, so two images of the same folder are never upserted at
//! the same time by one run. Per-item failures are counted, never fatal.

use crate::aggregate::folder_for_key;
use crate::candidate::{CandidateDecision, CandidateFilter};
use crate::config::BackfillConfig;
use crate::gateway::{ImageTags, DEFAULT_HEADER_BYTES};
use crate::processor::ImageProcessor;
use crate::store::{ObjectDescriptor, StoreError};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, trace, warn, Instrument};
use uuid::Uuid;

/// Failures that make a whole run meaningless.
#[derive(Error, Debug)]
pub enum BackfillError {
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Failed to list objects: {0}")]
    Listing(StoreError),
}

impl From<StoreError> for BackfillError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::BucketNotFound(bucket) => BackfillError::BucketNotFound(bucket),
            other => BackfillError::Listing(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackfillOptions {
    pub prefix: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub header_bytes: u64,
    pub dry_run: bool,
}

impl BackfillOptions {
    pub fn from_config(config: &BackfillConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            batch_size: config.batch_size,
            concurrency: config.effective_concurrency(),
            header_bytes: config.header_bytes,
            dry_run: config.dry_run,
        }
    }
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            batch_size: 5,
            concurrency: 5,
            header_bytes: DEFAULT_HEADER_BYTES,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillState {
    Idle,
    Scanning,
    Batching,
    /// 1-based batch index
    ProcessingBatch { index: usize, total: usize },
    Done,
}

impl fmt::Display for BackfillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackfillState::Idle => write!(f, "idle"),
            BackfillState::Scanning => write!(f, "scanning"),
            BackfillState::Batching => write!(f, "batching"),
            BackfillState::ProcessingBatch { index, total } => {
                write!(f, "processing batch {}/{}", index, total)
            }
            BackfillState::Done => write!(f, "done"),
        }
    }
}

/// Live counters for one run.
#[derive(Debug)]
pub struct RunStatistics {
    total_files: AtomicU64,
    processed: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    started: Instant,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self {
            total_files: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            updated: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    fn set_total_files(&self, total: u64) {
        self.total_files.store(total, Ordering::SeqCst);
    }

    fn record(&self, outcome: &ItemOutcome) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        let counter = match outcome {
            ItemOutcome::Updated(_) => &self.updated,
            ItemOutcome::Skipped => &self.skipped,
            ItemOutcome::Failed => &self.errors,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> RunSummary {
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let processed = self.processed.load(Ordering::SeqCst);
        let throughput = if elapsed_secs > 0.0 {
            processed as f64 / elapsed_secs
        } else {
            0.0
        };

        RunSummary {
            total_files: self.total_files.load(Ordering::SeqCst),
            processed,
            updated: self.updated.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
            elapsed_secs,
            throughput,
        }
    }
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RunStatistics`].
///
/// `processed` counts every settled candidate, so
/// `updated + skipped + errors == processed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_files: u64,
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    pub elapsed_secs: f64,
    /// Processed candidates per second
    pub throughput: f64,
}

impl RunSummary {
    pub fn progress_percent(&self) -> f64 {
        if self.total_files == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total_files as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub run_id: Uuid,
    pub summary: RunSummary,
    /// Keys indexed by this run (or that would be, in dry-run), sorted.
    pub updated_keys: Vec<String>,
    /// The run stopped at a batch boundary before consuming every batch.
    pub cancelled: bool,
    pub dry_run: bool,
}

#[derive(Debug)]
enum ItemOutcome {
    Updated(String),
    Skipped,
    Failed,
}

pub struct BackfillDriver {
    processor: Arc<ImageProcessor>,
    filter: CandidateFilter,
    state: Mutex<BackfillState>,
}

impl BackfillDriver {
    pub fn new(processor: Arc<ImageProcessor>, filter: CandidateFilter) -> Self {
        Self {
            processor,
            filter,
            state: Mutex::new(BackfillState::Idle),
        }
    }

    pub fn state(&self) -> BackfillState {
        *self.state.lock()
    }

    fn transition(&self, next: BackfillState) {
        let mut state = self.state.lock();
        let previous = *state;
        trace!(from = %previous, to = %next, "Backfill state change");
        *state = next;
    }

    /// Run a full backfill over `bucket`.
    ///
    /// Only a missing bucket or a failed listing is returned as an error.
    /// `cancel` is honored between batches.
    pub async fn run(
        &self,
        bucket: &str,
        options: &BackfillOptions,
        cancel: &CancellationToken,
    ) -> Result<BackfillReport, BackfillError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "backfill",
            %run_id,
            bucket = %bucket,
            prefix = %options.prefix,
            dry_run = options.dry_run
        );
        self.execute(run_id, bucket, options, cancel)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        bucket: &str,
        options: &BackfillOptions,
        cancel: &CancellationToken,
    ) -> Result<BackfillReport, BackfillError> {
        let stats = RunStatistics::new();
        let gateway = self.processor.gateway();

        if options.dry_run {
            warn!("DRY RUN: aggregates and image tags will not be written");
        }

        self.transition(BackfillState::Scanning);
        if !gateway.bucket_exists(bucket).await? {
            return Err(BackfillError::BucketNotFound(bucket.to_string()));
        }

        let listed = gateway.list_objects(bucket, &options.prefix).await?;
        let listed_count = listed.len();
        let candidates: Vec<ObjectDescriptor> = listed
            .into_iter()
            .filter(|object| match self.filter.evaluate(&object.key) {
                CandidateDecision::Process => true,
                CandidateDecision::Skip { reason } => {
                    trace!(key = %object.key, reason = %reason, "Not a candidate");
                    false
                }
            })
            .collect();
        stats.set_total_files(candidates.len() as u64);

        info!(
            listed = listed_count,
            candidates = candidates.len(),
            "Scan complete"
        );

        self.transition(BackfillState::Batching);
        let batch_size = options.batch_size.max(1);
        let batches: Vec<&[ObjectDescriptor]> = candidates.chunks(batch_size).collect();
        let total_batches = batches.len();

        let mut updated_keys = Vec::new();
        let mut cancelled = false;

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    completed_batches = index,
                    total_batches, "Stop requested, ending run at batch boundary"
                );
                cancelled = true;
                break;
            }

            self.transition(BackfillState::ProcessingBatch {
                index: index + 1,
                total: total_batches,
            });

            for outcome in self.process_batch(bucket, batch, options).await {
                stats.record(&outcome);
                if let ItemOutcome::Updated(key) = outcome {
                    updated_keys.push(key);
                }
            }

            let progress = stats.snapshot();
            info!(
                batch = index + 1,
                total_batches,
                processed = progress.processed,
                total_files = progress.total_files,
                errors = progress.errors,
                "Progress: {:.1}%",
                progress.progress_percent()
            );
        }

        self.transition(BackfillState::Done);
        updated_keys.sort();
        let summary = stats.snapshot();

        info!(
            total_files = summary.total_files,
            processed = summary.processed,
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors,
            elapsed_secs = summary.elapsed_secs,
            throughput = summary.throughput,
            cancelled,
            "Backfill finished"
        );
        if options.dry_run {
            warn!(
                would_update = summary.updated,
                "DRY RUN complete: no mutation occurred"
            );
        }

        Ok(BackfillReport {
            run_id,
            summary,
            updated_keys,
            cancelled,
            dry_run: options.dry_run,
        })
    }

    /// Process one batch and wait for every item to settle.
    async fn process_batch(
        &self,
        bucket: &str,
        batch: &[ObjectDescriptor],
        options: &BackfillOptions,
    ) -> Vec<ItemOutcome> {
        let mut groups: Vec<(&str, Vec<&ObjectDescriptor>)> = Vec::new();
        for object in batch {
            let folder = folder_for_key(&object.key);
            match groups.iter_mut().find(|(f, _)| *f == folder) {
                Some((_, items)) => items.push(object),
                None => groups.push((folder, vec![object])),
            }
        }

        stream::iter(groups)
            .map(|(folder, items)| async move {
                trace!(folder = %folder, items = items.len(), "Processing folder group");
                let mut outcomes = Vec::with_capacity(items.len());
                for object in items {
                    outcomes.push(self.process_item(bucket, object, options).await);
                }
                outcomes
            })
            .buffer_unordered(options.concurrency.max(1))
            .flat_map(stream::iter)
            .collect()
            .await
    }

    #[instrument(skip(self, listed, options), fields(key = %listed.key))]
    async fn process_item(
        &self,
        bucket: &str,
        listed: &ObjectDescriptor,
        options: &BackfillOptions,
    ) -> ItemOutcome {
        let key = listed.key.as_str();
        let gateway = self.processor.gateway();

        let descriptor = match gateway.stat_object(bucket, key).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(key = %key, error = %e, "Stat failed");
                metrics::counter!("indexer.images.failed").increment(1);
                return ItemOutcome::Failed;
            }
        };

        if ImageTags::is_processed(&descriptor.tags) {
            debug!(key = %key, "Already processed, skipping");
            metrics::counter!("indexer.images.skipped").increment(1);
            return ItemOutcome::Skipped;
        }

        let header = match gateway
            .fetch_header_bytes(bucket, key, options.header_bytes)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Fetch failed");
                metrics::counter!("indexer.images.failed").increment(1);
                return ItemOutcome::Failed;
            }
        };

        match self
            .processor
            .index(&descriptor, &header, options.dry_run)
            .await
        {
            Ok(indexed) => {
                debug!(
                    key = %key,
                    folder = %indexed.folder,
                    has_exif = indexed.exif.has_exif,
                    "Indexed"
                );
                metrics::counter!("indexer.images.updated").increment(1);
                ItemOutcome::Updated(indexed.key)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Indexing failed");
                metrics::counter!("indexer.images.failed").increment(1);
                ItemOutcome::Failed
            }
        }
    }
}
