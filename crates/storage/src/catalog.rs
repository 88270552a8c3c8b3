//! Persistence of the tracked image list under a single storage key.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use shared::domain::{ImageId, ImageRecord, ImageStatus};
use tracing::{info, warn};

use crate::KeyValueStore;

pub const CATALOG_KEY: &str = "uploadedImages";

/// Lenient mirror of [`ImageRecord`] so that one damaged entry does not
/// throw away the whole list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredImageRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<ImageStatus>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    actions: Option<Vec<String>>,
    #[serde(default)]
    uploaded_at: Option<String>,
}

impl StoredImageRecord {
    fn into_record(self) -> Option<ImageRecord> {
        let id = ImageId::new(self.id?);
        if !id.is_valid() {
            return None;
        }
        Some(ImageRecord {
            id,
            status: self.status.unwrap_or(ImageStatus::Pending),
            filename: self.filename.unwrap_or_default(),
            actions: self.actions.unwrap_or_default(),
            uploaded_at: self.uploaded_at.unwrap_or_default(),
        })
    }
}

#[derive(Clone)]
pub struct ImageCatalog {
    store: Arc<dyn KeyValueStore>,
}

impl ImageCatalog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Reads the persisted list. Unreadable or malformed data yields an
    /// empty list; entries without a usable id are dropped.
    pub async fn load(&self) -> Vec<ImageRecord> {
        let raw = match self.store.get(CATALOG_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(error = %err, "catalog: failed to read persisted images");
                return Vec::new();
            }
        };

        match decode_records(&raw) {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "catalog: persisted images are malformed; starting empty");
                Vec::new()
            }
        }
    }

    pub async fn save(&self, records: &[ImageRecord]) -> Result<()> {
        let encoded = serde_json::to_string(records).context("failed to serialize images")?;
        self.store.set(CATALOG_KEY, &encoded).await
    }
}

fn decode_records(raw: &str) -> Result<Vec<ImageRecord>> {
    let stored: Vec<StoredImageRecord> =
        serde_json::from_str(raw).context("failed to parse persisted images")?;
    let total = stored.len();
    let records: Vec<ImageRecord> = stored
        .into_iter()
        .filter_map(StoredImageRecord::into_record)
        .collect();
    if records.len() != total {
        info!(
            discarded = total - records.len(),
            "catalog: dropped persisted images without an id"
        );
    }
    Ok(records)
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
