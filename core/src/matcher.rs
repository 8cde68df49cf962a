//! Database-mode matching: assign detected subjects to roster entries.
//!
//! Each detection is compared against every roster description; the
//! highest scorer wins if it clears the confidence threshold, otherwise
//! the detection is Unknown. The whole-photo classification follows from
//! the detection count and match results.

use crate::detection::SubjectDetection;
use crate::error::VisionError;
use crate::vision::VisionBackend;
use tracing::{debug, warn};

/// Classification of one photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoDecision {
    /// No detections at all.
    NoFaces,
    /// Exactly one detection, matched to a roster entry.
    SingleSubject { name: String },
    /// Exactly one detection, below threshold against every entry.
    UnknownSubjects,
    /// Two or more detections. Matched names sorted lexicographically,
    /// one literal `Unknown` per unmatched detection.
    MultipleSubjects { names: Vec<String> },
}

/// Literal token an unmatched detection contributes to a group name.
pub const UNKNOWN_TOKEN: &str = "Unknown";

/// Best roster match for one detection, or None below threshold.
async fn best_match(
    detection: &SubjectDetection,
    roster: &[(String, String)],
    threshold: f64,
    backend: &dyn VisionBackend,
) -> Result<Option<String>, VisionError> {
    let mut best: Option<(&str, f64)> = None;

    for (name, description) in roster {
        let score = match backend
            .compare_two_descriptions(&detection.outfit_description, description)
            .await
        {
            Ok(verdict) => verdict.similarity.clamp(0.0, 1.0),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(%err, name, "comparison failed; scoring 0.0");
                0.0
            }
        };
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((name, score));
        }
    }

    Ok(best.and_then(|(name, score)| {
        debug!(name, score, threshold, "best roster match");
        (score >= threshold).then(|| name.to_string())
    }))
}

/// Classifies a photo's detections against the roster.
pub async fn classify_photo(
    detections: &[SubjectDetection],
    roster: &[(String, String)],
    threshold: f64,
    backend: &dyn VisionBackend,
) -> Result<PhotoDecision, VisionError> {
    match detections {
        [] => Ok(PhotoDecision::NoFaces),
        [single] => Ok(match best_match(single, roster, threshold, backend).await? {
            Some(name) => PhotoDecision::SingleSubject { name },
            None => PhotoDecision::UnknownSubjects,
        }),
        many => {
            let mut matched = Vec::new();
            let mut unknown = 0usize;
            for detection in many {
                match best_match(detection, roster, threshold, backend).await? {
                    Some(name) => matched.push(name),
                    None => unknown += 1,
                }
            }
            matched.sort();
            matched.extend((0..unknown).map(|_| UNKNOWN_TOKEN.to_string()));
            Ok(PhotoDecision::MultipleSubjects { names: matched })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ComparisonScore;
    use crate::media::EncodedImage;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct ScriptedComparator {
        /// (detection description, roster description) → score.
        scores: HashMap<(String, String), f64>,
    }

    impl ScriptedComparator {
        fn new(pairs: &[(&str, &str, f64)]) -> Self {
            Self {
                scores: pairs
                    .iter()
                    .map(|(a, b, s)| ((a.to_string(), b.to_string()), *s))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl VisionBackend for ScriptedComparator {
        async fn describe_one_face(&self, _image: &EncodedImage) -> Result<String, VisionError> {
            unimplemented!("not used by the matcher")
        }

        async fn detect_all_subjects(
            &self,
            _image: &EncodedImage,
        ) -> Result<Vec<SubjectDetection>, VisionError> {
            unimplemented!("not used by the matcher")
        }

        async fn compare_two_descriptions(
            &self,
            a: &str,
            b: &str,
        ) -> Result<ComparisonScore, VisionError> {
            let similarity = self
                .scores
                .get(&(a.to_string(), b.to_string()))
                .copied()
                .unwrap_or(0.0);
            Ok(ComparisonScore {
                similarity,
                reasoning: String::new(),
            })
        }
    }

    fn roster() -> Vec<(String, String)> {
        vec![
            ("Alice".to_string(), "desc alpha".to_string()),
            ("Bob".to_string(), "desc beta".to_string()),
        ]
    }

    fn det(desc: &str) -> SubjectDetection {
        SubjectDetection::from_description(desc)
    }

    #[tokio::test]
    async fn test_no_detections() {
        let backend = ScriptedComparator::new(&[]);
        let decision = classify_photo(&[], &roster(), 0.7, &backend).await.unwrap();
        assert_eq!(decision, PhotoDecision::NoFaces);
    }

    #[tokio::test]
    async fn test_single_match_above_threshold() {
        let backend = ScriptedComparator::new(&[("photo det", "desc alpha", 0.82)]);
        let decision = classify_photo(&[det("photo det")], &roster(), 0.7, &backend)
            .await
            .unwrap();
        assert_eq!(
            decision,
            PhotoDecision::SingleSubject {
                name: "Alice".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_single_below_threshold_is_unknown() {
        let backend = ScriptedComparator::new(&[("photo det", "desc alpha", 0.69)]);
        let decision = classify_photo(&[det("photo det")], &roster(), 0.7, &backend)
            .await
            .unwrap();
        assert_eq!(decision, PhotoDecision::UnknownSubjects);
    }

    #[tokio::test]
    async fn test_highest_scoring_entry_wins() {
        let backend = ScriptedComparator::new(&[
            ("photo det", "desc alpha", 0.75),
            ("photo det", "desc beta", 0.9),
        ]);
        let decision = classify_photo(&[det("photo det")], &roster(), 0.7, &backend)
            .await
            .unwrap();
        assert_eq!(
            decision,
            PhotoDecision::SingleSubject {
                name: "Bob".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_multiple_sorted_with_unknown_tokens() {
        let backend = ScriptedComparator::new(&[
            ("d1", "desc beta", 0.8),
            ("d2", "desc alpha", 0.8),
        ]);
        let decision = classify_photo(
            &[det("d1"), det("d2"), det("stranger")],
            &roster(),
            0.7,
            &backend,
        )
        .await
        .unwrap();
        assert_eq!(
            decision,
            PhotoDecision::MultipleSubjects {
                names: vec![
                    "Alice".to_string(),
                    "Bob".to_string(),
                    UNKNOWN_TOKEN.to_string()
                ]
            }
        );
    }

    #[tokio::test]
    async fn test_multiple_all_unknown() {
        let backend = ScriptedComparator::new(&[]);
        let decision = classify_photo(&[det("x"), det("y")], &roster(), 0.7, &backend)
            .await
            .unwrap();
        assert_eq!(
            decision,
            PhotoDecision::MultipleSubjects {
                names: vec![UNKNOWN_TOKEN.to_string(), UNKNOWN_TOKEN.to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_empty_roster_single_is_unknown() {
        let backend = ScriptedComparator::new(&[]);
        let decision = classify_photo(&[det("x")], &[], 0.7, &backend).await.unwrap();
        assert_eq!(decision, PhotoDecision::UnknownSubjects);
    }
}
