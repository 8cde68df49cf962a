//! HTTP-level tests for the Anthropic backend: retry policy, error
//! classification, and payload extraction from fenced model output.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use photosort_core::config::RetryPolicy;
use photosort_core::media::EncodedImage;
use photosort_core::vision::VisionBackend;
use photosort_core::{AnthropicBackend, VisionError};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        delay_secs: 0,
    }
}

fn backend(server: &MockServer) -> AnthropicBackend {
    AnthropicBackend::new(
        "test-key",
        "sonnet",
        Duration::from_secs(5),
        fast_retry(),
    )
    .unwrap()
    .with_base_url(format!("{}/v1/messages", server.uri()))
}

fn test_image() -> EncodedImage {
    EncodedImage {
        base64_payload: BASE64.encode(b"pixels"),
        media_type: "image/jpeg",
        content_hash: "deadbeef".to_string(),
    }
}

fn text_response(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "content": [{ "type": "text", "text": text }]
    }))
}

#[tokio::test]
async fn test_detect_parses_fenced_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .respond_with(text_response(
            "Here you go:\n```json\n[{\"outfit_description\": \"white helmet, blue suit\", \"bib_number\": \"23\"}]\n```",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let detections = backend(&server)
        .detect_all_subjects(&test_image())
        .await
        .unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].bib_number.as_deref(), Some("23"));
}

#[tokio::test]
async fn test_overloaded_retries_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "error": { "type": "overloaded_error", "message": "Overloaded" }
        })))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(text_response("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let detections = backend(&server)
        .detect_all_subjects(&test_image())
        .await
        .unwrap();
    assert!(detections.is_empty());
}

#[tokio::test]
async fn test_transient_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = backend(&server)
        .detect_all_subjects(&test_image())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VisionError::RetriesExhausted { attempts: 3, .. }
    ));
}

#[tokio::test]
async fn test_auth_failure_is_fatal_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "type": "authentication_error", "message": "invalid x-api-key" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = backend(&server)
        .detect_all_subjects(&test_image())
        .await
        .unwrap_err();
    assert!(matches!(err, VisionError::NotAuthenticated(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_compare_extracts_similarity_and_reasoning() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(text_response(
            "{\"similarity\": 0.73, \"reasoning\": \"same helmet, different boots\"}",
        ))
        .mount(&server)
        .await;

    let verdict = backend(&server)
        .compare_two_descriptions("a", "b")
        .await
        .unwrap();
    assert_eq!(verdict.similarity, 0.73);
    assert_eq!(verdict.reasoning, "same helmet, different boots");
}

#[tokio::test]
async fn test_describe_returns_trimmed_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(text_response("\n  A racer in a blue suit.  \n"))
        .mount(&server)
        .await;

    let description = backend(&server)
        .describe_one_face(&test_image())
        .await
        .unwrap();
    assert_eq!(description, "A racer in a blue suit.");
}
