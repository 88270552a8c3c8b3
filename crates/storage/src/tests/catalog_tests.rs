use std::sync::Arc;

use chrono::{TimeZone, Utc};
use shared::domain::{ImageId, ImageRecord, ImageStatus, ProcessingAction};

use super::*;
use crate::{KeyValueStore, MemoryStore, Storage};

fn sample(id: &str, status: ImageStatus) -> ImageRecord {
    let mut record = ImageRecord::pending(
        ImageId::from(id),
        format!("{id}.png"),
        &[ProcessingAction::Resize, ProcessingAction::Watermark],
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 30).unwrap(),
    );
    record.status = status;
    record
}

#[tokio::test]
async fn save_then_load_reproduces_the_list() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let catalog = ImageCatalog::new(store);
    let records = vec![
        sample("b", ImageStatus::Pending),
        sample("a", ImageStatus::Done),
        sample("c", ImageStatus::Unrecognized("Queued".to_string())),
    ];

    catalog.save(&records).await.expect("save");

    assert_eq!(catalog.load().await, records);
}

#[tokio::test]
async fn load_drops_entries_without_usable_id() {
    let store = Arc::new(MemoryStore::new());
    store
        .set(
            CATALOG_KEY,
            r#"[
                {"id": "keep", "status": "Done", "filename": "a.png", "actions": ["Resize"], "uploadedAt": "t"},
                {"id": "", "status": "Pending", "filename": "b.png", "actions": [], "uploadedAt": "t"},
                {"id": "   ", "status": "Pending", "filename": "c.png", "actions": [], "uploadedAt": "t"},
                {"status": "Pending", "filename": "d.png", "actions": [], "uploadedAt": "t"},
                {"id": null, "status": "Failed", "filename": "e.png", "actions": [], "uploadedAt": "t"}
            ]"#,
        )
        .await
        .expect("seed");

    let records = ImageCatalog::new(store).load().await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, ImageId::from("keep"));
    assert_eq!(records[0].status, ImageStatus::Done);
}

#[tokio::test]
async fn malformed_data_loads_as_empty_list() {
    let store = Arc::new(MemoryStore::new());
    store.set(CATALOG_KEY, "{not json").await.expect("seed");

    assert!(ImageCatalog::new(store).load().await.is_empty());
}

#[tokio::test]
async fn missing_optional_fields_get_defaults() {
    let store = Arc::new(MemoryStore::new());
    store
        .set(CATALOG_KEY, r#"[{"id": "abc"}]"#)
        .await
        .expect("seed");

    let records = ImageCatalog::new(store).load().await;

    assert_eq!(
        records,
        vec![ImageRecord {
            id: ImageId::from("abc"),
            status: ImageStatus::Pending,
            filename: String::new(),
            actions: Vec::new(),
            uploaded_at: String::new(),
        }]
    );
}

#[tokio::test]
async fn catalog_persists_through_sqlite_storage() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let catalog = ImageCatalog::new(Arc::new(storage.clone()));
    let records = vec![sample("abc", ImageStatus::Failed)];

    catalog.save(&records).await.expect("save");

    let raw = storage.get(CATALOG_KEY).await.expect("get").expect("slot");
    assert!(raw.contains("\"uploadedAt\""));
    assert_eq!(catalog.load().await, records);
}
