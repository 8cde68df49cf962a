//! Typed façade over the vision RPC.
//!
//! Three operations: describe the single primary subject, enumerate all
//! subjects, and compare two descriptions. Any backend satisfying
//! [`VisionBackend`] is acceptable; production uses the Anthropic Messages
//! API. Retry handling lives here so every backend gets the same policy:
//! transient errors retry with linear backoff, fatal errors surface
//! immediately.

mod anthropic;
pub mod json;
pub mod prompts;

pub use anthropic::AnthropicBackend;

use crate::config::RetryPolicy;
use crate::detection::{ComparisonScore, SubjectDetection};
use crate::error::VisionError;
use crate::media::EncodedImage;
use async_trait::async_trait;
use std::future::Future;
use tracing::warn;

/// The vision service contract. Credentials and transport are the
/// backend's business; the engine only sees these three operations.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Canonical textual description of the image's primary subject.
    async fn describe_one_face(&self, image: &EncodedImage) -> Result<String, VisionError>;

    /// Every distinguishable subject in the image. Empty is a valid
    /// result: no faces.
    async fn detect_all_subjects(
        &self,
        image: &EncodedImage,
    ) -> Result<Vec<SubjectDetection>, VisionError>;

    /// Textual similarity of two descriptions, in [0, 1].
    async fn compare_two_descriptions(
        &self,
        a: &str,
        b: &str,
    ) -> Result<ComparisonScore, VisionError>;
}

/// Runs `op` under the retry policy: fatal errors return immediately,
/// transient errors retry with linear backoff until attempts run out.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, VisionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VisionError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!(%err, attempt, delay_secs = delay.as_secs(), "transient vision error, retrying");
                tokio::time::sleep(delay).await;
                last = Some(err);
            }
            Err(err) if err.is_transient() => {
                return Err(VisionError::RetriesExhausted {
                    attempts,
                    last: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    // Unreachable with attempts >= 1; keep the compiler satisfied.
    Err(VisionError::RetriesExhausted {
        attempts,
        last: last.map(|e| e.to_string()).unwrap_or_default(),
    })
}

/// Short-name → backend model id. One table, one fallback rule: names
/// containing a dash are assumed to already be full ids and pass through
/// unchanged.
pub fn resolve_model(short_name: &str) -> String {
    const TABLE: &[(&str, &str)] = &[
        ("haiku", "claude-haiku-4-5"),
        ("opus", "claude-opus-4-1"),
        ("sonnet", "claude-sonnet-4-5"),
    ];

    for (short, id) in TABLE {
        if short_name.eq_ignore_ascii_case(short) {
            return (*id).to_string();
        }
    }
    short_name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> VisionError {
        VisionError::ApiResponse {
            status: 529,
            message: "overloaded".to_string(),
            error_type: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            delay_secs: 2,
        };

        let result = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            delay_secs: 1,
        };

        let result: Result<(), _> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            VisionError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            delay_secs: 1,
        };

        let result: Result<(), _> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VisionError::NotAuthenticated("bad key".to_string())) }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            VisionError::NotAuthenticated(_)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_model_table_and_fallback() {
        assert_eq!(resolve_model("sonnet"), "claude-sonnet-4-5");
        assert_eq!(resolve_model("SONNET"), "claude-sonnet-4-5");
        assert_eq!(
            resolve_model("claude-sonnet-4-5-20250929"),
            "claude-sonnet-4-5-20250929"
        );
        assert_eq!(resolve_model("custommodel"), "custommodel");
    }

    #[test]
    fn test_transient_classification() {
        for status in [408u16, 429, 500, 503, 522, 529] {
            let err = VisionError::ApiResponse {
                status,
                message: String::new(),
                error_type: None,
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
        for status in [400u16, 401, 403, 404] {
            let err = VisionError::ApiResponse {
                status,
                message: String::new(),
                error_type: None,
            };
            assert!(!err.is_transient(), "{status} should be fatal");
        }
    }
}
