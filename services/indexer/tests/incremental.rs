mod common;

use common::{jpeg, Harness, BUCKET};
use exif_indexer::gateway::{TAG_DATE_TAKEN, TAG_HAS_EXIF, TAG_PROCESSED_AT};
use exif_indexer::{BackfillOptions, ObjectDescriptor, ObjectStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn upload(harness: &Harness, key: &str, body: &[u8]) -> ObjectDescriptor {
    harness.put_image(key, body.to_vec());
    harness.store.stat(BUCKET, key).await.unwrap()
}

#[tokio::test]
async fn test_stored_image_is_indexed_and_tagged() {
    let harness = Harness::new();
    let body = jpeg("Canon", "2024:12:25 10:30:45");
    let descriptor = upload(&harness, "party/cake.jpg", &body).await;

    assert!(harness.updater().on_image_stored(BUCKET, "party/cake.jpg", &body, &descriptor).await);

    let party = harness.aggregate("party").unwrap();
    assert_eq!(party.folder_name, "party");
    assert_eq!(party.total_images, 1);
    let entry = party.entry("party/cake.jpg").unwrap();
    assert_eq!(entry.file_size, body.len() as u64);
    assert_eq!(entry.etag, descriptor.etag);

    let tags = harness.tags("party/cake.jpg");
    assert_eq!(tags[TAG_HAS_EXIF], "true");
    assert_eq!(tags[TAG_DATE_TAKEN], "2024-12-25T10:30:45Z");
    assert!(tags.contains_key(TAG_PROCESSED_AT));
}

#[tokio::test]
async fn test_reupload_replaces_entry() {
    let harness = Harness::new();
    let updater = harness.updater();

    let first = jpeg("Canon", "2024:12:25 10:30:45");
    let descriptor = upload(&harness, "party/cake.jpg", &first).await;
    assert!(updater.on_image_stored(BUCKET, "party/cake.jpg", &first, &descriptor).await);

    let second = jpeg("Sony", "2024:12:25 11:00:00");
    let descriptor = upload(&harness, "party/cake.jpg", &second).await;
    assert!(updater.on_image_stored(BUCKET, "party/cake.jpg", &second, &descriptor).await);

    let party = harness.aggregate("party").unwrap();
    assert_eq!(party.total_images, 1);
    assert_eq!(
        party.entry("party/cake.jpg").unwrap().exif.camera_make.as_deref(),
        Some("Sony")
    );
}

#[tokio::test]
async fn test_store_failure_reports_false_without_panicking() {
    let harness = Harness::new();
    let body = jpeg("Canon", "2024:12:25 10:30:45");
    let descriptor = upload(&harness, "party/cake.jpg", &body).await;
    harness.store.fail_key("party/party.json");

    let ok = harness
        .updater()
        .on_image_stored(BUCKET, "party/cake.jpg", &body, &descriptor)
        .await;

    assert!(!ok);
    assert!(!harness.tags("party/cake.jpg").contains_key(TAG_HAS_EXIF));
}

#[tokio::test]
async fn test_image_without_exif_still_indexed() {
    let harness = Harness::new();
    let body = b"\x89PNG\r\n\x1a\n no exif here".to_vec();
    let descriptor = upload(&harness, "scans/page.png", &body).await;

    assert!(harness.updater().on_image_stored(BUCKET, "scans/page.png", &body, &descriptor).await);

    let entry = harness.aggregate("scans").unwrap().entry("scans/page.png").cloned().unwrap();
    assert!(!entry.exif.has_exif);
    assert_eq!(harness.tags("scans/page.png")[TAG_HAS_EXIF], "false");
    assert!(!harness.tags("scans/page.png").contains_key(TAG_DATE_TAKEN));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_to_one_folder() {
    let harness = Arc::new(Harness::new());
    harness.store.set_latency(Some(Duration::from_millis(5)));

    let mut handles = Vec::new();
    for i in 0..8 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("wedding/img_{}.jpg", i);
            let body = jpeg("Canon", "2024:06:15 14:00:00");
            let descriptor = upload(&harness, &key, &body).await;
            harness.updater().on_image_stored(BUCKET, &key, &body, &descriptor).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let wedding = harness.aggregate("wedding").unwrap();
    assert_eq!(wedding.total_images, 8);
    assert!(wedding.is_consistent());
}

#[tokio::test]
async fn test_backfill_skips_incrementally_indexed_images() {
    let harness = Harness::new();
    let body = jpeg("Canon", "2024:12:25 10:30:45");
    let descriptor = upload(&harness, "party/cake.jpg", &body).await;
    assert!(harness.updater().on_image_stored(BUCKET, "party/cake.jpg", &body, &descriptor).await);
    harness.put_image("party/balloons.jpg", jpeg("Canon", "2024:12:25 10:31:00"));

    let report = harness
        .driver()
        .run(BUCKET, &BackfillOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.summary.total_files, 2);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.updated_keys, vec!["party/balloons.jpg"]);
    assert_eq!(harness.aggregate("party").unwrap().total_images, 2);
}
