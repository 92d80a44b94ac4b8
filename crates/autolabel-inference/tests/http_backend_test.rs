//! HTTP detection backend against a wiremock server.

use std::time::Duration;

use autolabel_core::{DetectionBackend, DetectionConfig, Error};
use autolabel_inference::HttpDetectionBackend;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer, timeout_secs: u64) -> HttpDetectionBackend {
    let config =
        DetectionConfig::new(format!("{}/predict", server.uri())).with_timeout_secs(timeout_secs);
    HttpDetectionBackend::new(&config).expect("client")
}

#[tokio::test]
async fn test_detect_posts_image_path_and_parses_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .and(body_json(json!({"image_path": "http://cdn/a.jpg"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "annotations": [
                {"label": "cat", "bbox": [0.1, 0.2, 0.5, 0.6], "confidence": 0.92},
                {"bbox": [1, 2, 3]}
            ],
            "image_width": 640,
            "image_height": 480
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = backend(&server, 5).detect("http://cdn/a.jpg").await.unwrap();
    assert_eq!(resp.annotations.len(), 2);
    assert_eq!(resp.annotations[0].label.as_deref(), Some("cat"));
    assert_eq!(resp.annotations[1].bbox.len(), 3);
    assert_eq!(resp.image_width, Some(640));
    assert_eq!(resp.image_height, Some(480));
}

#[tokio::test]
async fn test_missing_annotations_field_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let resp = backend(&server, 5).detect("http://cdn/a.jpg").await.unwrap();
    assert!(resp.annotations.is_empty());
    assert_eq!(resp.image_size(), None);
}

#[tokio::test]
async fn test_server_error_is_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = backend(&server, 5).detect("http://cdn/a.jpg").await.unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
    assert!(err.to_string().contains("502"));
}

#[tokio::test]
async fn test_garbage_body_is_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = backend(&server, 5).detect("http://cdn/a.jpg").await.unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
}

#[tokio::test]
async fn test_timeout_is_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"annotations": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = backend(&server, 1).detect("http://cdn/a.jpg").await.unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
}

#[tokio::test]
async fn test_unreachable_is_upstream() {
    let config = DetectionConfig::new("http://127.0.0.1:1/predict").with_timeout_secs(2);
    let backend = HttpDetectionBackend::new(&config).unwrap();
    let err = backend.detect("http://cdn/a.jpg").await.unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
    assert!(!backend.health_check().await.unwrap());
}

#[tokio::test]
async fn test_health_check_accepts_method_not_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let backend = backend(&server, 5);
    assert!(backend.health_check().await.unwrap());
    assert!(backend.endpoint().ends_with("/predict"));
}

#[tokio::test]
async fn test_health_check_rejects_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert!(!backend(&server, 5).health_check().await.unwrap());
}
