//! # autolabel-core
//!
//! Core types, traits, and geometry for the autolabel pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other autolabel crates depend on.

pub mod bbox;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use bbox::{BBox, CropRect, ImageSize, Origin};
pub use config::{DetectionConfig, PipelineConfig, S3Config, StorageConfig};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
