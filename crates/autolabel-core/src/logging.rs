//! Structured logging field names for autolabel.
//!
//! Every crate logs through `tracing` using these names so log aggregation can
//! query the same fields across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded run, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, dataset/batch completions |
//! | DEBUG | Decision points, cache hits, config choices |
//! | TRACE | Per-item iteration (individual annotations, listed keys) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "pipeline", "db", "storage", "inference", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "batch", "labeler", "exporter", "descriptor", "filesystem", "s3"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "label_dataset", "infer_and_save", "rebuild", "upsert"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Dataset name.
pub const DATASET: &str = "dataset";

/// Labeling version tag.
pub const VERSION: &str = "version";

/// Record file name.
pub const FILE_NAME: &str = "file_name";

/// Object-store key.
pub const STORAGE_KEY: &str = "storage_key";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of tasks submitted.
pub const TOTAL: &str = "total";

/// Number of annotations produced or exported.
pub const ANNOTATION_COUNT: &str = "annotation_count";

/// Concurrency limit in effect.
pub const CONCURRENCY: &str = "concurrency";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Count of successful tasks, or a boolean success indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
