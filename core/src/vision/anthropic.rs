//! Anthropic Messages API backend.
//!
//! Non-streaming request/response client. Each operation builds one user
//! message (image block + prompt, or text-only for comparisons), applies
//! the shared retry policy, and extracts the typed payload from whatever
//! shape the model replied in.

use super::json::{extract_json, extract_similarity};
use super::{prompts, resolve_model, with_retry, VisionBackend};
use crate::config::RetryPolicy;
use crate::detection::{ComparisonScore, SubjectDetection};
use crate::error::VisionError;
use crate::media::EncodedImage;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Messages API endpoint.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Output budget for detection and description responses.
const MAX_TOKENS: u32 = 2048;

/// Output budget for comparison responses, which are a short JSON object.
const MAX_TOKENS_COMPARE: u32 = 1024;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Vision backend over the Anthropic Messages API.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    retry: RetryPolicy,
    base_url: String,
}

impl AnthropicBackend {
    /// Creates a backend with the given credentials and per-call timeout.
    pub fn new(
        api_key: impl Into<String>,
        model_short_name: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, VisionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: resolve_model(model_short_name),
            retry,
            base_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    /// Points the client at a different endpoint. Test hook.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn headers(&self) -> Result<HeaderMap, VisionError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| VisionError::NotAuthenticated("malformed API key".to_string()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        Ok(headers)
    }

    /// One round-trip: send `content` blocks, return the model's text.
    async fn send_once(&self, content: Value, max_tokens: u32) -> Result<String, VisionError> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": content }],
        });

        let response = self
            .client
            .post(&self.base_url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &text));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Parse(format!("malformed Messages response: {e}")))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect();
        if text.is_empty() {
            return Err(VisionError::Parse("response carried no text".to_string()));
        }
        Ok(text)
    }

    async fn send(&self, content: Value, max_tokens: u32) -> Result<String, VisionError> {
        with_retry(&self.retry, || self.send_once(content.clone(), max_tokens)).await
    }

    fn image_content(image: &EncodedImage, prompt: &str) -> Value {
        json!([
            {
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": image.media_type,
                    "data": image.base64_payload,
                }
            },
            { "type": "text", "text": prompt }
        ])
    }
}

/// Maps an HTTP failure to the engine's error taxonomy.
fn classify_error(status: u16, body: &str) -> VisionError {
    let (error_type, message) = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => (Some(parsed.error.error_type), parsed.error.message),
        Err(_) => (None, body.to_string()),
    };

    // Billing exhaustion arrives as a 400 with a billing error type; it
    // must not be retried like other client errors are not, but it gets
    // its own kind so the CLI can report it distinctly.
    if error_type.as_deref() == Some("billing_error")
        || message.contains("credit balance is too low")
    {
        return VisionError::QuotaExhausted(message);
    }

    match status {
        401 | 403 => VisionError::NotAuthenticated(message),
        400 | 404 | 422 => VisionError::InvalidRequest(message),
        _ => VisionError::ApiResponse {
            status,
            message,
            error_type,
        },
    }
}

#[async_trait]
impl VisionBackend for AnthropicBackend {
    async fn describe_one_face(&self, image: &EncodedImage) -> Result<String, VisionError> {
        let content = Self::image_content(image, prompts::DESCRIBE_FACE_PROMPT);
        let text = self.send(content, MAX_TOKENS).await?;
        Ok(text.trim().to_string())
    }

    async fn detect_all_subjects(
        &self,
        image: &EncodedImage,
    ) -> Result<Vec<SubjectDetection>, VisionError> {
        let content = Self::image_content(image, prompts::DETECT_SUBJECTS_PROMPT);
        let text = self.send(content, MAX_TOKENS).await?;
        parse_detections(&text)
    }

    async fn compare_two_descriptions(
        &self,
        a: &str,
        b: &str,
    ) -> Result<ComparisonScore, VisionError> {
        let prompt = prompts::comparison_prompt(a, b);
        let content = json!([{ "type": "text", "text": prompt }]);
        let text = self.send(content, MAX_TOKENS_COMPARE).await?;

        let similarity = extract_similarity(&text)
            .ok_or_else(|| VisionError::Parse(format!("no similarity score in: {text}")))?;
        let reasoning = extract_json(&text)
            .and_then(|v| v.get("reasoning").and_then(Value::as_str).map(String::from))
            .unwrap_or_default();
        debug!(similarity, %reasoning, "comparison verdict");
        Ok(ComparisonScore {
            similarity,
            reasoning,
        })
    }
}

/// Parses detection output: a JSON array, or an object wrapping one under
/// `outfits`/`subjects`/`faces`, with malformed entries dropped.
fn parse_detections(text: &str) -> Result<Vec<SubjectDetection>, VisionError> {
    if text.contains("NO_FACES_DETECTED") {
        return Ok(Vec::new());
    }

    let value =
        extract_json(text).ok_or_else(|| VisionError::Parse(format!("no JSON in: {text}")))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => ["outfits", "subjects", "faces"]
            .iter()
            .find_map(|key| map.remove(*key))
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default(),
        _ => return Err(VisionError::Parse("unexpected detection shape".to_string())),
    };

    let mut detections = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<SubjectDetection>(item) {
            Ok(d) if !d.outfit_description.trim().is_empty() => detections.push(d),
            Ok(_) => warn!("dropping detection with empty description"),
            Err(e) => warn!(%e, "dropping malformed detection"),
        }
    }
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detections_array() {
        let text = r#"[{"outfit_description": "white SMITH helmet, blue suit", "bib_number": "23"}]"#;
        let detections = parse_detections(text).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bib_number.as_deref(), Some("23"));
    }

    #[test]
    fn test_parse_detections_wrapped_object() {
        let text = r#"{"outfits": [{"outfit_description": "red jacket"}]}"#;
        assert_eq!(parse_detections(text).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_detections_empty_object_means_no_faces() {
        assert!(parse_detections(r#"{"outfits": []}"#).unwrap().is_empty());
        assert!(parse_detections("NO_FACES_DETECTED").unwrap().is_empty());
    }

    #[test]
    fn test_parse_detections_drops_malformed_entries() {
        let text = r#"[
            {"outfit_description": "blue suit"},
            {"position": "left"},
            {"outfit_description": "   "}
        ]"#;
        let detections = parse_detections(text).unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn test_classify_auth_and_quota() {
        let err = classify_error(401, r#"{"error": {"type": "authentication_error", "message": "bad key"}}"#);
        assert!(matches!(err, VisionError::NotAuthenticated(_)));
        assert!(err.is_fatal());

        let err = classify_error(
            400,
            r#"{"error": {"type": "billing_error", "message": "credit balance is too low"}}"#,
        );
        assert!(matches!(err, VisionError::QuotaExhausted(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_classify_overload_is_transient() {
        let err = classify_error(529, r#"{"error": {"type": "overloaded_error", "message": "overloaded"}}"#);
        assert!(err.is_transient());
    }
}
