//! Top-level labeling use cases.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use autolabel_core::{
    annotations_from_detections, defaults, Annotation, BBox, DetectionBackend, Error, ImageRecord,
    ImageSize, ListRecordsRequest, ObjectStore, Origin, PipelineConfig, RawDetection, RecordKey,
    RecordRepository, RecordSummary, Result, StorageKey, UpsertRecordRequest,
};

use crate::batch::BatchRunner;
use crate::crop::{crop_key, crop_region};
use crate::descriptor::{DescriptorGenerator, DescriptorRef};
use crate::export::{ExportSummary, Exporter};
use crate::labeler::{LabelTask, Labeler};
use crate::labels::LabelWriter;

/// Result of labeling one dataset version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDatasetReport {
    pub dataset: String,
    pub version: String,
    pub total: usize,
    pub success: usize,
    /// Identities of the images that failed.
    pub failures: Vec<String>,
    pub export: Option<ExportSummary>,
    pub descriptor: Option<DescriptorRef>,
}

/// Result of labeling every eligible dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelAllReport {
    pub total_files: usize,
    pub total_success: usize,
    pub version: String,
    pub datasets: Vec<LabelDatasetReport>,
    /// Datasets that failed as a whole, with the error message.
    pub failed_datasets: Vec<(String, String)>,
}

/// Region of an existing image to cut out and label again.
#[derive(Debug, Clone)]
pub struct CropRequest {
    pub source: StorageKey,
    /// Region in the source image, fractional or absolute.
    pub bbox: BBox,
    pub dataset: String,
    pub version: String,
    /// Store the crop as its own record.
    pub persist: bool,
}

/// What crop-and-relabel produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropOutcome {
    pub crop_key: StorageKey,
    pub crop_url: String,
    pub origin: Origin,
    pub crop_size: ImageSize,
    pub original_size: ImageSize,
    /// Detections in source-image pixel space.
    pub annotations: Vec<Annotation>,
    pub record: Option<ImageRecord>,
}

/// Wires discovery, labeling, export and descriptors together.
pub struct Pipeline {
    config: PipelineConfig,
    records: Arc<dyn RecordRepository>,
    store: Arc<dyn ObjectStore>,
    detector: Arc<dyn DetectionBackend>,
    labeler: Arc<Labeler>,
    labels: Arc<LabelWriter>,
    exporter: Exporter,
    descriptors: DescriptorGenerator,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        records: Arc<dyn RecordRepository>,
        store: Arc<dyn ObjectStore>,
        detector: Arc<dyn DetectionBackend>,
    ) -> Self {
        let labeler = Arc::new(Labeler::new(
            records.clone(),
            detector.clone(),
            store.clone(),
        ));
        let labels = Arc::new(LabelWriter::new(store.clone(), &config.metadata_root));
        let exporter = Exporter::new(records.clone(), store.clone(), &config.metadata_root);
        let descriptors = DescriptorGenerator::new(store.clone(), &config.metadata_root);
        Self {
            config,
            records,
            store,
            detector,
            labeler,
            labels,
            exporter,
            descriptors,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn labeler(&self) -> &Labeler {
        &self.labeler
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    pub fn descriptors(&self) -> &DescriptorGenerator {
        &self.descriptors
    }

    fn dataset_prefix(&self, dataset: &str) -> String {
        format!("{}/{}", self.config.dataset_root, dataset)
    }

    /// Every labelable image of a dataset, grouped by class folder.
    async fn discover(&self, dataset: &str, version: &str) -> Result<Vec<LabelTask>> {
        let root = self.dataset_prefix(dataset);
        let classes = self.store.list_folders(&root).await?;
        if classes.is_empty() {
            return Err(Error::NotFound(format!("dataset {}", dataset)));
        }

        let mut tasks = Vec::new();
        for class in &classes {
            let files = self.store.list_files(&format!("{}/{}", root, class)).await?;
            let before = tasks.len();
            tasks.extend(
                files
                    .into_iter()
                    .filter(|key| key.is_labelable_image())
                    .map(|key| LabelTask {
                        public_url: self.store.public_url(&key),
                        storage_key: key,
                        dataset: dataset.to_string(),
                        version: version.to_string(),
                    }),
            );
            debug!(dataset, class = %class, images = tasks.len() - before, "Class folder scanned");
        }
        Ok(tasks)
    }

    /// Label every image of one dataset, then rebuild its export and
    /// descriptor.
    #[instrument(skip(self), fields(subsystem = "pipeline", component = "orchestrator", op = "label_dataset"))]
    pub async fn label_dataset(&self, dataset: &str, version: &str) -> Result<LabelDatasetReport> {
        let start = Instant::now();
        let tasks = self.discover(dataset, version).await?;
        let total = tasks.len();
        info!(
            total,
            concurrency = self.config.concurrency,
            detector = self.detector.endpoint(),
            "Starting dataset labeling"
        );

        let labeler = self.labeler.clone();
        let labels = self.labels.clone();
        let summary = BatchRunner::new(self.config.concurrency)
            .run(tasks, move |task: LabelTask| {
                let labeler = labeler.clone();
                let labels = labels.clone();
                async move {
                    let record = labeler.infer_and_save(&task).await?;
                    labels.write_or_warn(&record).await;
                    Ok(())
                }
            })
            .await;

        let export = if summary.success > 0 {
            Some(self.exporter.rebuild(dataset, version).await?)
        } else {
            None
        };

        let classes = self.exporter.class_list(dataset, version).await;
        let descriptor = if classes.is_empty() {
            warn!("No classes found, descriptor not generated");
            None
        } else {
            self.descriptors.generate(dataset, version, &classes).await?
        };

        info!(
            total,
            success = summary.success,
            failed = summary.failed(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Dataset labeling complete"
        );

        Ok(LabelDatasetReport {
            dataset: dataset.to_string(),
            version: version.to_string(),
            total,
            success: summary.success,
            failures: summary.failures,
            export,
            descriptor,
        })
    }

    /// Label every dataset whose folder name carries the configured prefix.
    ///
    /// Datasets run one after another; a failing dataset is logged and
    /// skipped.
    pub async fn label_all(&self, version: &str) -> Result<LabelAllReport> {
        let start = Instant::now();
        let mut datasets = self.store.list_folders(&self.config.dataset_root).await?;
        datasets.retain(|d| d.starts_with(&self.config.dataset_prefix));
        info!(
            subsystem = "pipeline",
            component = "orchestrator",
            op = "label_all",
            version,
            datasets = datasets.len(),
            "Labeling all datasets"
        );

        let mut report = LabelAllReport {
            total_files: 0,
            total_success: 0,
            version: version.to_string(),
            datasets: Vec::new(),
            failed_datasets: Vec::new(),
        };

        for dataset in datasets {
            match self.label_dataset(&dataset, version).await {
                Ok(r) => {
                    report.total_files += r.total;
                    report.total_success += r.success;
                    report.datasets.push(r);
                }
                Err(e) => {
                    error!(
                        subsystem = "pipeline",
                        component = "orchestrator",
                        dataset = %dataset,
                        error = %e,
                        "Dataset labeling failed, continuing with the next one"
                    );
                    report.failed_datasets.push((dataset, e.to_string()));
                }
            }
        }

        info!(
            subsystem = "pipeline",
            component = "orchestrator",
            op = "label_all",
            total = report.total_files,
            success = report.total_success,
            failed_datasets = report.failed_datasets.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "All datasets labeled"
        );
        Ok(report)
    }

    /// Cut a region out of a stored image, label the cut-out and map the
    /// detections back into the source image.
    #[instrument(skip(self), fields(subsystem = "pipeline", component = "orchestrator", op = "crop_and_relabel"))]
    pub async fn crop_and_relabel(&self, req: CropRequest) -> Result<CropOutcome> {
        let source = self.store.read_bytes(&req.source).await?;
        let bbox = req.bbox;
        let region = tokio::task::spawn_blocking(move || crop_region(&source, &bbox))
            .await
            .map_err(|e| Error::Internal(format!("crop task failed: {}", e)))??;

        let key = crop_key(&req.dataset);
        let crop_url = self
            .store
            .upload_bytes(&key, region.jpeg, defaults::MIME_JPEG)
            .await?;

        let response = self.detector.detect(&crop_url).await?;
        let annotations = remap_to_original(
            &response.annotations,
            region.rect.size,
            region.rect.origin,
            region.original,
        );
        debug!(
            storage_key = %key,
            annotation_count = annotations.len(),
            "Crop labeled"
        );

        let record = if req.persist {
            let record_key = RecordKey::new(key.file_name(), &req.dataset, &req.version);
            match self.records.find(&record_key).await? {
                Some(existing) => Some(existing),
                None => Some(
                    self.records
                        .upsert(UpsertRecordRequest {
                            key: record_key,
                            storage_key: key.clone(),
                            public_url: crop_url.clone(),
                            annotations: annotations.clone(),
                            size: Some(region.original),
                            is_crop: true,
                        })
                        .await?,
                ),
            }
        } else {
            None
        };

        Ok(CropOutcome {
            crop_key: key,
            crop_url,
            origin: region.rect.origin,
            crop_size: region.rect.size,
            original_size: region.original,
            annotations,
            record,
        })
    }

    /// Records, most recently updated first.
    pub async fn list_records(&self, req: ListRecordsRequest) -> Result<Vec<RecordSummary>> {
        Ok(self
            .records
            .list(req)
            .await?
            .iter()
            .map(ImageRecord::summary)
            .collect())
    }

    pub async fn get_record(&self, key: &RecordKey) -> Result<ImageRecord> {
        self.records.get(key).await
    }

    pub async fn list_datasets(&self) -> Result<Vec<String>> {
        self.records.list_datasets().await
    }

    /// Re-run detection for one stored image and refresh its sidecar.
    pub async fn reinfer(&self, key: &RecordKey) -> Result<ImageRecord> {
        let existing = self.records.get(key).await?;
        let record = self
            .labeler
            .reinfer(&LabelTask {
                storage_key: existing.storage_key.clone(),
                public_url: existing.public_url.clone(),
                dataset: existing.dataset.clone(),
                version: existing.version.clone(),
            })
            .await?;
        self.labels.write_or_warn(&record).await;
        Ok(record)
    }

    /// Store hand-made detections for an image and refresh its sidecar.
    pub async fn save_manual(
        &self,
        key: RecordKey,
        storage_key: StorageKey,
        detections: Vec<RawDetection>,
    ) -> Result<ImageRecord> {
        let record = self
            .labeler
            .save_manual(key, storage_key, detections, false)
            .await?;
        self.labels.write_or_warn(&record).await;
        Ok(record)
    }
}

/// Convert detections made on a crop into annotations in source-image space.
fn remap_to_original(
    detections: &[RawDetection],
    crop_size: ImageSize,
    origin: Origin,
    original: ImageSize,
) -> Vec<Annotation> {
    annotations_from_detections(detections, None)
        .into_iter()
        .map(|mut ann| {
            ann.bbox = ann
                .bbox
                .remap_crop_to_original(crop_size, origin, original);
            ann
        })
        .collect()
}
