//! HTTP detection backend.
//!
//! The model service accepts `POST {"image_path": "<public url>"}` and answers
//! with a [`DetectionResponse`] body.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use autolabel_core::{defaults, DetectionBackend, DetectionConfig, DetectionResponse, Error, Result};

#[derive(Serialize)]
struct DetectRequest<'a> {
    image_path: &'a str,
}

/// Detection backend that calls the model over HTTP.
pub struct HttpDetectionBackend {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpDetectionBackend {
    /// Build a backend with the given endpoint and per-request timeout.
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "http",
            endpoint = %config.url,
            timeout_secs = config.timeout_secs,
            "Detection backend configured"
        );

        Ok(Self {
            client,
            url: config.url.clone(),
            timeout,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(&DetectionConfig::from_env()?)
    }
}

#[async_trait]
impl DetectionBackend for HttpDetectionBackend {
    #[instrument(skip(self), fields(subsystem = "inference", component = "http", op = "detect"))]
    async fn detect(&self, image_url: &str) -> Result<DetectionResponse> {
        let start = Instant::now();

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&DetectRequest {
                image_path: image_url,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Upstream(format!(
                        "detection timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    Error::Upstream(format!("detection request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(Error::Upstream(format!(
                "detection returned {}: {}",
                status, snippet
            )));
        }

        let parsed: DetectionResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("undecodable detection response: {}", e)))?;

        debug!(
            annotation_count = parsed.annotations.len(),
            image_width = parsed.image_width,
            image_height = parsed.image_height,
            duration_ms = start.elapsed().as_millis() as u64,
            "Detection complete"
        );
        Ok(parsed)
    }

    /// Any HTTP answer below 500 counts as reachable: the endpoint only
    /// serves POST, so a plain GET commonly yields 404 or 405.
    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(defaults::HEALTH_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(resp) if !resp.status().is_server_error() => {
                info!(
                    subsystem = "inference",
                    component = "http",
                    status = resp.status().as_u16(),
                    "Detection health check passed"
                );
                Ok(true)
            }
            Ok(resp) => {
                warn!(
                    subsystem = "inference",
                    component = "http",
                    status = resp.status().as_u16(),
                    "Detection health check failed"
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "http",
                    error = %e,
                    "Detection health check error"
                );
                Ok(false)
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
