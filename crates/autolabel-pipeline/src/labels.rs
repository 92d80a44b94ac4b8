//! Per-image label sidecars.
//!
//! One text file per image at
//! `{metadata_root}/{dataset}/{version}/labels/{stem}.txt`, one line per
//! annotation: `label x1 y1 x2 y2 confidence`.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{trace, warn};

use autolabel_core::{defaults, Annotation, ImageRecord, ObjectStore, Result, StorageKey};

/// Render annotations in sidecar format. Empty input renders an empty file.
pub fn render_labels(annotations: &[Annotation]) -> String {
    let mut out = String::new();
    for (i, a) in annotations.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(
            out,
            "{} {:.6} {:.6} {:.6} {:.6} {:.4}",
            a.label, a.bbox.x1, a.bbox.y1, a.bbox.x2, a.bbox.y2, a.confidence
        );
    }
    out
}

/// Writes label sidecars into the object store.
pub struct LabelWriter {
    store: Arc<dyn ObjectStore>,
    metadata_root: String,
}

impl LabelWriter {
    pub fn new(store: Arc<dyn ObjectStore>, metadata_root: impl Into<String>) -> Self {
        Self {
            store,
            metadata_root: metadata_root.into(),
        }
    }

    /// Sidecar key for one image of a dataset version.
    pub fn key_for(&self, dataset: &str, version: &str, file_name: &str) -> StorageKey {
        let stem = StorageKey::new(file_name).file_stem().to_string();
        StorageKey::new(format!(
            "{}/{}/{}/{}/{}.txt",
            self.metadata_root,
            dataset,
            version,
            defaults::LABELS_DIR,
            stem
        ))
    }

    /// Write (or overwrite) the sidecar for a record. Returns its key.
    pub async fn write(&self, record: &ImageRecord) -> Result<StorageKey> {
        let key = self.key_for(&record.dataset, &record.version, &record.file_name);
        let body = render_labels(&record.annotations);
        self.store
            .upload_text(&key, &body, defaults::MIME_TEXT)
            .await?;
        trace!(
            subsystem = "pipeline",
            component = "labels",
            storage_key = %key,
            annotation_count = record.annotations.len(),
            "Label sidecar written"
        );
        Ok(key)
    }

    /// Write the sidecar, logging a failure instead of returning it.
    ///
    /// The record is already stored at this point and the export is rebuilt
    /// from records, so a missing sidecar does not fail the image.
    pub async fn write_or_warn(&self, record: &ImageRecord) -> Option<StorageKey> {
        match self.write(record).await {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(
                    subsystem = "pipeline",
                    component = "labels",
                    dataset = %record.dataset,
                    version = %record.version,
                    file_name = %record.file_name,
                    error = %e,
                    "Label sidecar write failed"
                );
                None
            }
        }
    }
}
