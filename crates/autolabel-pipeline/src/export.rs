//! COCO-style dataset export.
//!
//! The canonical path is [`Exporter::rebuild`]: scan every record of a dataset
//! version in id order and write the whole blob once. Category ids are
//! assigned first-seen in that scan, so an unchanged store always yields the
//! same bytes. [`Exporter::merge_record`] is the older incremental path and is
//! kept for single-record updates outside a pipeline run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use autolabel_core::{
    defaults, Error, ImageRecord, ObjectStore, RecordRepository, Result, StorageKey,
};

// =============================================================================
// DOCUMENT
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CocoInfo {
    pub description: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CocoImage {
    pub id: u64,
    pub storage_path: String,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CocoAnnotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    pub label: String,
    /// `[x, y, width, height]`
    pub bbox: [f64; 4],
    pub area: f64,
    pub iscrowd: u8,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CocoCategory {
    pub id: u64,
    pub name: String,
    pub supercategory: String,
}

/// COCO-style export of one dataset version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CocoExport {
    pub info: CocoInfo,
    pub licenses: Vec<serde_json::Value>,
    pub images: Vec<CocoImage>,
    pub annotations: Vec<CocoAnnotation>,
    pub categories: Vec<CocoCategory>,
}

impl CocoExport {
    /// Category names in id order.
    pub fn class_list(&self) -> Vec<String> {
        let mut cats: Vec<&CocoCategory> = self.categories.iter().collect();
        cats.sort_by_key(|c| c.id);
        cats.into_iter().map(|c| c.name.clone()).collect()
    }
}

/// Category name an annotation label exports under.
pub fn category_name(label: &str) -> &str {
    if label.trim().is_empty() {
        defaults::UNLABELED_CATEGORY
    } else {
        label
    }
}

/// Incrementally assembles an export. Rebuild and merge both go through it,
/// which keeps their category numbering identical.
pub struct CocoBuilder {
    doc: CocoExport,
    category_ids: HashMap<String, u64>,
    next_image_id: u64,
    next_annotation_id: u64,
    next_category_id: u64,
}

impl CocoBuilder {
    pub fn new(dataset: &str, version: &str) -> Self {
        Self::from_export(CocoExport {
            info: CocoInfo {
                description: format!("{} auto-labeled annotations", dataset),
                version: version.to_string(),
            },
            ..Default::default()
        })
    }

    /// Continue numbering after the ids already present in `doc`.
    pub fn from_export(doc: CocoExport) -> Self {
        let category_ids = doc
            .categories
            .iter()
            .map(|c| (c.name.clone(), c.id))
            .collect();
        let next_image_id = doc.images.iter().map(|i| i.id).max().unwrap_or(0) + 1;
        let next_annotation_id = doc.annotations.iter().map(|a| a.id).max().unwrap_or(0) + 1;
        let next_category_id = doc.categories.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        Self {
            doc,
            category_ids,
            next_image_id,
            next_annotation_id,
            next_category_id,
        }
    }

    fn category_id(&mut self, name: &str) -> u64 {
        if let Some(id) = self.category_ids.get(name) {
            return *id;
        }
        let id = self.next_category_id;
        self.next_category_id += 1;
        self.category_ids.insert(name.to_string(), id);
        self.doc.categories.push(CocoCategory {
            id,
            name: name.to_string(),
            supercategory: "none".to_string(),
        });
        id
    }

    /// Drop a previously exported image (and its annotations) by file name.
    pub fn remove_image(&mut self, file_name: &str) {
        let removed: Vec<u64> = self
            .doc
            .images
            .iter()
            .filter(|i| i.file_name == file_name)
            .map(|i| i.id)
            .collect();
        if removed.is_empty() {
            return;
        }
        self.doc.images.retain(|i| !removed.contains(&i.id));
        self.doc
            .annotations
            .retain(|a| !removed.contains(&a.image_id));
    }

    /// Append one record as an image plus its annotations.
    pub fn push_record(&mut self, record: &ImageRecord) {
        let image_id = self.next_image_id;
        self.next_image_id += 1;
        self.doc.images.push(CocoImage {
            id: image_id,
            storage_path: record.storage_key.as_str().to_string(),
            file_name: record.file_name.clone(),
            width: record.width.unwrap_or(defaults::FALLBACK_IMAGE_SIZE),
            height: record.height.unwrap_or(defaults::FALLBACK_IMAGE_SIZE),
        });

        for ann in &record.annotations {
            let name = category_name(&ann.label).to_string();
            let category_id = self.category_id(&name);
            let id = self.next_annotation_id;
            self.next_annotation_id += 1;
            self.doc.annotations.push(CocoAnnotation {
                id,
                image_id,
                category_id,
                label: name,
                bbox: ann.bbox.to_xywh(),
                area: ann.bbox.area(),
                iscrowd: 0,
                score: ann.confidence,
            });
        }
    }

    pub fn finish(self) -> CocoExport {
        self.doc
    }
}

/// Build an export from records already in scan order.
pub fn build_export(dataset: &str, version: &str, records: &[ImageRecord]) -> CocoExport {
    let mut builder = CocoBuilder::new(dataset, version);
    for record in records {
        builder.push_record(record);
    }
    builder.finish()
}

// =============================================================================
// EXPORTER
// =============================================================================

/// Where an export was written and what it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub key: StorageKey,
    pub url: String,
    pub total_images: usize,
    pub total_annotations: usize,
    pub total_categories: usize,
}

/// Reads and writes the per-version export blob.
pub struct Exporter {
    records: Arc<dyn RecordRepository>,
    store: Arc<dyn ObjectStore>,
    metadata_root: String,
    merge_locks: Mutex<HashMap<StorageKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Exporter {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        store: Arc<dyn ObjectStore>,
        metadata_root: impl Into<String>,
    ) -> Self {
        Self {
            records,
            store,
            metadata_root: metadata_root.into(),
            merge_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Object key of the export for a dataset version.
    pub fn export_key(&self, dataset: &str, version: &str) -> StorageKey {
        StorageKey::new(format!(
            "{}/{}/{}/{}",
            self.metadata_root,
            dataset,
            version,
            defaults::EXPORT_FILE
        ))
    }

    /// Regenerate the export from every stored record and write it once.
    pub async fn rebuild(&self, dataset: &str, version: &str) -> Result<ExportSummary> {
        let start = Instant::now();
        let records = self.records.scan(dataset, version).await?;
        let doc = build_export(dataset, version, &records);
        let summary = self.write(dataset, version, &doc).await?;

        info!(
            subsystem = "pipeline",
            component = "exporter",
            op = "rebuild",
            dataset,
            version,
            total = summary.total_images,
            annotation_count = summary.total_annotations,
            categories = summary.total_categories,
            duration_ms = start.elapsed().as_millis() as u64,
            "Export rebuilt"
        );
        Ok(summary)
    }

    /// Fold one record into the existing export.
    ///
    /// Merges on the same export key are serialized in-process. Must not run
    /// concurrently with a `rebuild` of the same dataset version.
    pub async fn merge_record(&self, record: &ImageRecord) -> Result<ExportSummary> {
        let key = self.export_key(&record.dataset, &record.version);
        let lock = self.merge_lock(&key)?;
        let _guard = lock.lock().await;

        let existing = match self.read(&record.dataset, &record.version).await {
            Ok(Some(doc)) => doc,
            Ok(None) => CocoExport::default(),
            Err(e) => {
                warn!(
                    storage_key = %key,
                    error = %e,
                    "Existing export unreadable, starting a fresh one"
                );
                CocoExport::default()
            }
        };
        let mut builder = if existing.images.is_empty() && existing.categories.is_empty() {
            CocoBuilder::new(&record.dataset, &record.version)
        } else {
            CocoBuilder::from_export(existing)
        };
        builder.remove_image(&record.file_name);
        builder.push_record(record);
        let doc = builder.finish();

        let summary = self.write(&record.dataset, &record.version, &doc).await?;
        debug!(
            subsystem = "pipeline",
            component = "exporter",
            op = "merge_record",
            file_name = %record.file_name,
            total = summary.total_images,
            "Record merged into export"
        );
        Ok(summary)
    }

    /// Current export, `None` when it was never written.
    pub async fn read(&self, dataset: &str, version: &str) -> Result<Option<CocoExport>> {
        let key = self.export_key(dataset, version);
        match self.store.read_text(&key).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Category names of the current export in id order.
    ///
    /// Missing or unparsable exports yield an empty list.
    pub async fn class_list(&self, dataset: &str, version: &str) -> Vec<String> {
        match self.read(dataset, version).await {
            Ok(Some(doc)) => doc.class_list(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(
                    subsystem = "pipeline",
                    component = "exporter",
                    dataset,
                    version,
                    error = %e,
                    "Export unreadable, treating class list as empty"
                );
                Vec::new()
            }
        }
    }

    async fn write(&self, dataset: &str, version: &str, doc: &CocoExport) -> Result<ExportSummary> {
        let key = self.export_key(dataset, version);
        let body = serde_json::to_string_pretty(doc)?;
        let url = self
            .store
            .upload_text(&key, &body, defaults::MIME_JSON)
            .await?;
        Ok(ExportSummary {
            key,
            url,
            total_images: doc.images.len(),
            total_annotations: doc.annotations.len(),
            total_categories: doc.categories.len(),
        })
    }

    fn merge_lock(&self, key: &StorageKey) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .merge_locks
            .lock()
            .map_err(|_| Error::Internal("export lock table poisoned".to_string()))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autolabel_core::{Annotation, AnnotationSource, BBox};
    use chrono::Utc;

    fn record(id: i64, file: &str, labels: &[&str], size: Option<(u32, u32)>) -> ImageRecord {
        ImageRecord {
            id,
            file_name: file.to_string(),
            dataset: "classes-pets".to_string(),
            version: "v1".to_string(),
            storage_key: StorageKey::new(format!("object_detection/classes-pets/x/{}", file)),
            public_url: format!("http://store/{}", file),
            annotations: labels
                .iter()
                .enumerate()
                .map(|(i, l)| Annotation {
                    id: i as u32 + 1,
                    label: l.to_string(),
                    bbox: BBox::new(10.0, 20.0, 40.0, 60.0),
                    confidence: 0.5,
                    source: AnnotationSource::Model,
                    suggested: false,
                })
                .collect(),
            width: size.map(|s| s.0),
            height: size.map(|s| s.1),
            is_edited: false,
            is_crop: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_assigns_first_seen_categories() {
        let records = vec![
            record(1, "a.jpg", &["dog", "cat"], Some((640, 480))),
            record(2, "b.jpg", &["cat", "bird"], None),
        ];
        let doc = build_export("classes-pets", "v1", &records);

        assert_eq!(doc.class_list(), vec!["dog", "cat", "bird"]);
        assert_eq!(doc.images.len(), 2);
        assert_eq!(doc.images[0].id, 1);
        assert_eq!(doc.images[1].id, 2);
        assert_eq!((doc.images[1].width, doc.images[1].height), (640, 640));
        assert_eq!(doc.annotations.len(), 4);
        let ids: Vec<u64> = doc.annotations.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        let cats: Vec<u64> = doc.annotations.iter().map(|a| a.category_id).collect();
        assert_eq!(cats, vec![1, 2, 2, 3]);
        assert_eq!(doc.annotations[0].bbox, [10.0, 20.0, 30.0, 40.0]);
        assert_eq!(doc.annotations[0].area, 1200.0);
        assert_eq!(doc.annotations[0].iscrowd, 0);
    }

    #[test]
    fn test_build_is_deterministic() {
        let records = vec![
            record(1, "a.jpg", &["dog"], Some((100, 100))),
            record(2, "b.jpg", &["cat", "dog"], Some((100, 100))),
        ];
        let first = serde_json::to_string_pretty(&build_export("d", "v1", &records)).unwrap();
        let second = serde_json::to_string_pretty(&build_export("d", "v1", &records)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_label_exports_as_unlabeled() {
        let doc = build_export("d", "v1", &[record(1, "a.jpg", &["", "  "], None)]);
        assert_eq!(doc.class_list(), vec!["unlabeled"]);
        assert!(doc.annotations.iter().all(|a| a.label == "unlabeled"));
    }

    #[test]
    fn test_incremental_matches_rebuild_categories() {
        let records = vec![
            record(1, "a.jpg", &["dog", "cat"], None),
            record(2, "b.jpg", &["bird"], None),
            record(3, "c.jpg", &["cat", "fish"], None),
        ];
        let rebuilt = build_export("d", "v1", &records);

        let mut doc = CocoBuilder::new("d", "v1").finish();
        for r in &records {
            let mut builder = CocoBuilder::from_export(doc);
            builder.push_record(r);
            doc = builder.finish();
        }
        assert_eq!(doc.categories, rebuilt.categories);
        assert_eq!(doc.annotations, rebuilt.annotations);
        assert_eq!(doc.images, rebuilt.images);
    }

    #[test]
    fn test_remove_image_drops_its_annotations() {
        let mut builder = CocoBuilder::new("d", "v1");
        builder.push_record(&record(1, "a.jpg", &["dog"], None));
        builder.push_record(&record(2, "b.jpg", &["cat"], None));
        builder.remove_image("a.jpg");
        let doc = builder.finish();
        assert_eq!(doc.images.len(), 1);
        assert_eq!(doc.images[0].file_name, "b.jpg");
        assert_eq!(doc.annotations.len(), 1);
        assert_eq!(doc.annotations[0].label, "cat");
    }

    #[test]
    fn test_tolerant_parse_of_sparse_export() {
        let doc: CocoExport =
            serde_json::from_str(r#"{"categories": [{"id": 2, "name": "b"}, {"id": 1, "name": "a"}]}"#)
                .unwrap();
        assert_eq!(doc.class_list(), vec!["a", "b"]);
        assert!(doc.images.is_empty());
    }
}
