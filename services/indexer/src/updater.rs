//! Incremental indexing, called right after an image has been stored.

use crate::candidate::{CandidateDecision, CandidateFilter};
use crate::processor::ImageProcessor;
use crate::store::ObjectDescriptor;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Indexes a freshly stored image into its folder aggregate.
///
/// Best effort: the upload that triggered it has already succeeded, so
/// failures are logged and reported as `false`, never raised.
pub struct IncrementalUpdater {
    processor: Arc<ImageProcessor>,
    filter: CandidateFilter,
}

impl IncrementalUpdater {
    pub fn new(processor: Arc<ImageProcessor>, filter: CandidateFilter) -> Self {
        Self { processor, filter }
    }

    /// Index `image_bytes` for the object at `bucket`/`key`.
    ///
    /// Returns `true` when the image was indexed or is not a candidate
    /// (not an image, thumbnail), `false` when indexing failed.
    #[instrument(skip(self, image_bytes, descriptor), fields(size = image_bytes.len()))]
    pub async fn on_image_stored(
        &self,
        bucket: &str,
        key: &str,
        image_bytes: &[u8],
        descriptor: &ObjectDescriptor,
    ) -> bool {
        if descriptor.bucket != bucket || descriptor.key != key {
            warn!(
                descriptor_bucket = %descriptor.bucket,
                descriptor_key = %descriptor.key,
                "Descriptor does not match the stored object, not indexing"
            );
            metrics::counter!("indexer.images.failed").increment(1);
            return false;
        }

        if let CandidateDecision::Skip { reason } = self.filter.evaluate(key) {
            debug!(reason = %reason, "Not indexing stored object");
            metrics::counter!("indexer.images.skipped").increment(1);
            return true;
        }

        match self.processor.index(descriptor, image_bytes, false).await {
            Ok(indexed) => {
                info!(
                    folder = %indexed.folder,
                    has_exif = indexed.exif.has_exif,
                    change = ?indexed.change,
                    "Image metadata indexed"
                );
                metrics::counter!("indexer.images.updated").increment(1);
                true
            }
            Err(e) => {
                warn!(error = %e, "Metadata indexing failed; upload is unaffected");
                metrics::counter!("indexer.images.failed").increment(1);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate_key, FolderAggregate};
    use crate::gateway::{Gateway, TAG_HAS_EXIF};
    use crate::memory_store::MemoryStore;
    use crate::repository::FolderRepository;
    use crate::store::{ObjectStore, Tags};
    use crate::test_helpers::{descriptor, sample_jpeg};
    use std::time::Duration;

    fn setup() -> (Arc<MemoryStore>, IncrementalUpdater) {
        let store = Arc::new(MemoryStore::with_bucket("photos"));
        let gateway = Arc::new(Gateway::new(store.clone(), Duration::from_secs(5)));
        let repository = Arc::new(FolderRepository::new(gateway.clone()));
        let processor = Arc::new(ImageProcessor::new(gateway, repository));
        (store, IncrementalUpdater::new(processor, CandidateFilter::default()))
    }

    #[tokio::test]
    async fn test_indexes_stored_image() {
        let (store, updater) = setup();
        let image = sample_jpeg();
        store.insert("photos", "trip/a.jpg", image.clone(), Tags::new());
        let snapshot = store.stat("photos", "trip/a.jpg").await.unwrap();

        assert!(updater.on_image_stored("photos", "trip/a.jpg", &image, &snapshot).await);

        let (body, _) = store.object("photos", &aggregate_key("trip")).unwrap();
        let aggregate: FolderAggregate = serde_json::from_slice(&body).unwrap();
        assert_eq!(aggregate.total_images, 1);
        assert_eq!(aggregate.images[0].exif.camera_make.as_deref(), Some("Canon"));
        assert!(store.object("photos", "trip/a.jpg").unwrap().1.contains_key(TAG_HAS_EXIF));
    }

    #[tokio::test]
    async fn test_failure_reported_as_false() {
        let (store, updater) = setup();
        store.fail_key("trip/trip.json");

        let ok = updater
            .on_image_stored("photos", "trip/a.jpg", &sample_jpeg(), &descriptor("photos", "trip/a.jpg", 10))
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_thumbnails_ignored() {
        let (store, updater) = setup();
        let ok = updater
            .on_image_stored(
                "photos",
                "trip/a_thumb.jpg",
                &sample_jpeg(),
                &descriptor("photos", "trip/a_thumb.jpg", 10),
            )
            .await;
        assert!(ok);
        assert!(store.object("photos", &aggregate_key("trip")).is_none());
    }

    #[tokio::test]
    async fn test_mismatched_descriptor_rejected() {
        let (_store, updater) = setup();
        let ok = updater
            .on_image_stored("photos", "trip/a.jpg", &sample_jpeg(), &descriptor("photos", "trip/b.jpg", 10))
            .await;
        assert!(!ok);
    }
}
