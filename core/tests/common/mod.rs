//! Shared test support: a scriptable vision backend and image fixtures.

use async_trait::async_trait;
use photosort_core::detection::{ComparisonScore, SubjectDetection};
use photosort_core::error::VisionError;
use photosort_core::media::{content_hash, EncodedImage};
use photosort_core::vision::VisionBackend;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// How a scripted detection call fails.
#[derive(Clone, Copy)]
pub enum ScriptedFailure {
    /// Retries exhausted on a transient error; run continues.
    Transient,
    /// Auth failure; aborts the run.
    Fatal,
}

/// Vision backend scripted by content hash and description pair.
#[derive(Default)]
pub struct MockBackend {
    detections: Mutex<HashMap<String, Vec<SubjectDetection>>>,
    failures: Mutex<HashMap<String, ScriptedFailure>>,
    descriptions: Mutex<HashMap<String, String>>,
    scores: Mutex<HashMap<(String, String), f64>>,
    pub default_score: f64,
    pub detect_calls: AtomicU64,
    pub describe_calls: AtomicU64,
    pub compare_calls: AtomicU64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the detections returned for the image at `path`.
    pub fn script_detections(&self, path: &Path, detections: Vec<SubjectDetection>) {
        let hash = hash_of(path);
        self.detections.lock().unwrap().insert(hash, detections);
    }

    /// Scripts a detection failure for the image at `path`.
    pub fn script_detect_failure(&self, path: &Path, failure: ScriptedFailure) {
        let hash = hash_of(path);
        self.failures.lock().unwrap().insert(hash, failure);
    }

    pub fn script_description(&self, path: &Path, description: &str) {
        let hash = hash_of(path);
        self.descriptions
            .lock()
            .unwrap()
            .insert(hash, description.to_string());
    }

    pub fn script_score(&self, a: &str, b: &str, score: f64) {
        self.scores
            .lock()
            .unwrap()
            .insert((a.to_string(), b.to_string()), score);
    }
}

#[async_trait]
impl VisionBackend for MockBackend {
    async fn describe_one_face(&self, image: &EncodedImage) -> Result<String, VisionError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .descriptions
            .lock()
            .unwrap()
            .get(&image.content_hash)
            .cloned()
            .unwrap_or_else(|| "described subject".to_string()))
    }

    async fn detect_all_subjects(
        &self,
        image: &EncodedImage,
    ) -> Result<Vec<SubjectDetection>, VisionError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().unwrap().get(&image.content_hash) {
            Some(ScriptedFailure::Transient) => {
                return Err(VisionError::RetriesExhausted {
                    attempts: 3,
                    last: "overloaded".to_string(),
                })
            }
            Some(ScriptedFailure::Fatal) => {
                return Err(VisionError::NotAuthenticated("bad key".to_string()))
            }
            None => {}
        }
        Ok(self
            .detections
            .lock()
            .unwrap()
            .get(&image.content_hash)
            .cloned()
            .unwrap_or_default())
    }

    async fn compare_two_descriptions(
        &self,
        a: &str,
        b: &str,
    ) -> Result<ComparisonScore, VisionError> {
        self.compare_calls.fetch_add(1, Ordering::SeqCst);
        let similarity = self
            .scores
            .lock()
            .unwrap()
            .get(&(a.to_string(), b.to_string()))
            .copied()
            .unwrap_or(self.default_score);
        Ok(ComparisonScore {
            similarity,
            reasoning: String::new(),
        })
    }
}

pub fn hash_of(path: &Path) -> String {
    content_hash(&std::fs::read(path).unwrap())
}

/// Writes a tiny solid-color PNG; the color makes the bytes (and hash)
/// unique per image.
pub fn write_png(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb(color));
    img.save(&path).unwrap();
    path
}

pub fn detection(description: &str) -> SubjectDetection {
    SubjectDetection::from_description(description)
}
