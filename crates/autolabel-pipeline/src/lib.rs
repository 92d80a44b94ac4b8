//! # autolabel-pipeline
//!
//! The auto-labeling workflow on top of `autolabel-core` traits.
//!
//! This crate provides:
//! - Bounded-concurrency batch execution with per-task failure isolation
//! - Infer-and-save with record caching
//! - COCO export, YOLO label sidecars and dataset descriptors
//! - Crop-and-relabel with coordinate remapping
//!
//! ## Example
//!
//! ```rust,ignore
//! use autolabel_pipeline::Pipeline;
//!
//! let pipeline = Pipeline::new(PipelineConfig::from_env(), records, store, detector);
//! let report = pipeline.label_dataset("classes-pets", "v1").await?;
//! println!("{}/{} labeled", report.success, report.total);
//! ```

pub mod batch;
pub mod crop;
pub mod descriptor;
pub mod export;
pub mod labeler;
pub mod labels;
pub mod pipeline;

pub use batch::{BatchRunner, BatchSummary};
pub use crop::{crop_key, crop_region, CroppedRegion};
pub use descriptor::{DatasetDescriptor, DescriptorGenerator, DescriptorRef};
pub use export::{
    build_export, category_name, CocoAnnotation, CocoBuilder, CocoCategory, CocoExport, CocoImage,
    CocoInfo, ExportSummary, Exporter,
};
pub use labeler::{read_image_size, LabelTask, Labeler};
pub use labels::{render_labels, LabelWriter};
pub use pipeline::{CropOutcome, CropRequest, LabelAllReport, LabelDatasetReport, Pipeline};
