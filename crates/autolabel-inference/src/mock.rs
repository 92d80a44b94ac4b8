//! Mock detection backend for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use autolabel_inference::mock::MockDetectionBackend;
//!
//! let backend = MockDetectionBackend::new()
//!     .with_detections(vec![RawDetection::new("cat", [0.1, 0.1, 0.5, 0.5], 0.9)])
//!     .with_failure_for("broken.jpg");
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use autolabel_core::{DetectionBackend, DetectionResponse, Error, RawDetection, Result};

/// Mock detection backend for testing.
#[derive(Clone)]
pub struct MockDetectionBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Default)]
struct MockConfig {
    default_response: DetectionResponse,
    /// First matching substring of the image URL wins.
    responses: Vec<(String, DetectionResponse)>,
    failures: Vec<String>,
    latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub image_url: String,
    pub timestamp: std::time::Instant,
}

/// Decrements the in-flight gauge even when the call future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockDetectionBackend {
    /// Create a backend that returns no detections.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Detections returned for every URL without a specific mapping.
    pub fn with_detections(mut self, detections: Vec<RawDetection>) -> Self {
        Arc::make_mut(&mut self.config).default_response.annotations = detections;
        self
    }

    /// Image size reported in the default response.
    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        let config = Arc::make_mut(&mut self.config);
        config.default_response.image_width = Some(width);
        config.default_response.image_height = Some(height);
        self
    }

    /// Full response for URLs containing `pattern`.
    pub fn with_response_for(
        mut self,
        pattern: impl Into<String>,
        response: DetectionResponse,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .responses
            .push((pattern.into(), response));
        self
    }

    /// Fail with an upstream error for URLs containing `pattern`.
    pub fn with_failure_for(mut self, pattern: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).failures.push(pattern.into());
        self
    }

    /// Set simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Get number of detect calls.
    pub fn call_count(&self) -> usize {
        self.call_log.lock().map(|log| log.len()).unwrap_or(0)
    }

    /// Highest number of detect calls observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Clear the call log and the in-flight peak.
    pub fn reset(&self) {
        if let Ok(mut log) = self.call_log.lock() {
            log.clear();
        }
        self.peak_in_flight.store(0, Ordering::SeqCst);
    }

    fn log_call(&self, image_url: &str) {
        if let Ok(mut log) = self.call_log.lock() {
            log.push(MockCall {
                image_url: image_url.to_string(),
                timestamp: std::time::Instant::now(),
            });
        }
    }
}

impl Default for MockDetectionBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DetectionBackend for MockDetectionBackend {
    async fn detect(&self, image_url: &str) -> Result<DetectionResponse> {
        self.log_call(image_url);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.config.latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.config.latency_ms)).await;
        } else {
            tokio::task::yield_now().await;
        }

        if self.config.failures.iter().any(|p| image_url.contains(p)) {
            return Err(Error::Upstream(format!(
                "simulated detection failure for {}",
                image_url
            )));
        }

        let response = self
            .config
            .responses
            .iter()
            .find(|(pattern, _)| image_url.contains(pattern))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.config.default_response.clone());
        Ok(response)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn endpoint(&self) -> &str {
        "mock://detection"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_response() {
        let backend = MockDetectionBackend::new()
            .with_detections(vec![RawDetection::new("cat", [0.1, 0.1, 0.5, 0.5], 0.9)])
            .with_image_size(640, 480);

        let resp = backend.detect("http://store/a.jpg").await.unwrap();
        assert_eq!(resp.annotations.len(), 1);
        assert_eq!(resp.image_width, Some(640));
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.calls()[0].image_url, "http://store/a.jpg");
    }

    #[tokio::test]
    async fn test_pattern_response_and_failure() {
        let backend = MockDetectionBackend::new()
            .with_response_for(
                "dog",
                DetectionResponse {
                    annotations: vec![RawDetection::new("dog", [1.0, 1.0, 9.0, 9.0], 0.7)],
                    ..Default::default()
                },
            )
            .with_failure_for("broken");

        let resp = backend.detect("http://store/dog/1.jpg").await.unwrap();
        assert_eq!(resp.annotations[0].label.as_deref(), Some("dog"));

        let resp = backend.detect("http://store/cat/1.jpg").await.unwrap();
        assert!(resp.annotations.is_empty());

        let err = backend.detect("http://store/broken.jpg").await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_peak_in_flight_tracks_overlap() {
        let backend = MockDetectionBackend::new().with_latency_ms(20);
        let mut handles = Vec::new();
        for i in 0..4 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.detect(&format!("http://store/{}.jpg", i)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(backend.peak_in_flight(), 4);

        backend.reset();
        assert_eq!(backend.call_count(), 0);
        assert_eq!(backend.peak_in_flight(), 0);
    }
}
