//! Centralized default constants for autolabel.
//!
//! Shared defaults live here so the pipeline, storage backends and the binary
//! never disagree on a magic number.

// =============================================================================
// DISCOVERY
// =============================================================================

/// Object-store prefix under which every dataset lives.
pub const DATASET_ROOT: &str = "object_detection";

/// Only dataset folders starting with this prefix are picked up by `label_all`.
pub const DATASET_PREFIX: &str = "classes-";

/// Image extensions eligible for labeling (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Default labeling version tag.
pub const VERSION: &str = "v1";

// =============================================================================
// ARTIFACTS
// =============================================================================

/// Object-store prefix for derived artifacts (exports, descriptors, sidecars).
pub const METADATA_ROOT: &str = "metadata";

/// File name of the COCO export inside `{metadata_root}/{dataset}/{version}/`.
pub const EXPORT_FILE: &str = "instances.json";

/// File name of the dataset descriptor.
pub const DESCRIPTOR_FILE: &str = "dataset.yaml";

/// Directory holding per-image label sidecars.
pub const LABELS_DIR: &str = "labels";

/// Directory (under the dataset name) holding uploaded crops.
pub const CROPS_DIR: &str = "crops";

/// Category name used when a detection carries no label.
pub const UNLABELED_CATEGORY: &str = "unlabeled";

/// Image dimension assumed in exports when a record's size is unknown.
pub const FALLBACK_IMAGE_SIZE: u32 = 640;

// =============================================================================
// CONCURRENCY
// =============================================================================

/// Maximum in-flight infer-and-save tasks per dataset.
pub const LABEL_CONCURRENCY: usize = 15;

// =============================================================================
// INFERENCE
// =============================================================================

/// Per-request timeout for the detection service (seconds).
pub const INFERENCE_TIMEOUT_SECS: u64 = 60;

/// Timeout for the detection health check (seconds).
pub const HEALTH_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// STORAGE
// =============================================================================

/// Default filesystem object-store root.
pub const STORAGE_PATH: &str = "./data/objects";

/// Default S3 region (R2 accepts "auto").
pub const S3_REGION: &str = "auto";

/// MIME type used for text artifacts.
pub const MIME_TEXT: &str = "text/plain";

/// MIME type used for JSON artifacts.
pub const MIME_JSON: &str = "application/json";

/// MIME type used for uploaded crops.
pub const MIME_JPEG: &str = "image/jpeg";

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for record listings.
pub const PAGE_LIMIT: i64 = 100;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;
