//! # autolabel-inference
//!
//! Object-detection backends for autolabel.
//!
//! This crate provides:
//! - `HttpDetectionBackend`, the client for the external model service
//! - `MockDetectionBackend` (feature `mock`), a scripted backend for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use autolabel_core::{DetectionBackend, DetectionConfig};
//! use autolabel_inference::HttpDetectionBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = HttpDetectionBackend::new(&DetectionConfig::new("http://model:8000/predict")).unwrap();
//!     let response = backend.detect("http://cdn/images/cat.jpg").await.unwrap();
//!     println!("{} detections", response.annotations.len());
//! }
//! ```

pub mod http;

// Mock detection backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use http::HttpDetectionBackend;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockDetectionBackend;
