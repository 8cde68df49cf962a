//! Data model for vision analysis results.
//!
//! A detection is semi-structured: the free-text `outfit_description` is the
//! canonical input to the comparator, the remaining fields are hints the
//! backend may or may not fill. Field names track the JSON schema the
//! detection prompt requests, with aliases for the variants older backends
//! emitted.

use serde::{Deserialize, Serialize};

/// One subject found in one image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectDetection {
    /// Where in the frame the subject sits ("center", "left side", ...).
    #[serde(default)]
    pub position: Option<String>,

    /// Free-text gear description; the canonical comparator input.
    pub outfit_description: String,

    /// Racing bib digits, present only when every digit was unambiguous.
    #[serde(default)]
    pub bib_number: Option<String>,

    #[serde(default)]
    pub helmet_brand: Option<String>,

    #[serde(default)]
    pub helmet_colors: Vec<String>,

    #[serde(default)]
    pub goggle_lens_color: Option<String>,

    #[serde(default)]
    pub goggle_strap_color: Option<String>,

    #[serde(default)]
    pub boot_brand: Option<String>,

    #[serde(default)]
    pub boot_colors: Vec<String>,

    #[serde(default, alias = "patterns")]
    pub clothing_patterns: Vec<String>,

    #[serde(default, alias = "primary_colors")]
    pub clothing_colors: Vec<String>,

    #[serde(default)]
    pub equipment_brands: Vec<String>,
}

impl SubjectDetection {
    /// A detection carrying only a description, for tests and roster
    /// comparisons where no structured hints exist.
    pub fn from_description(description: impl Into<String>) -> Self {
        Self {
            position: None,
            outfit_description: description.into(),
            bib_number: None,
            helmet_brand: None,
            helmet_colors: Vec::new(),
            goggle_lens_color: None,
            goggle_strap_color: None,
            boot_brand: None,
            boot_colors: Vec::new(),
            clothing_patterns: Vec::new(),
            clothing_colors: Vec::new(),
            equipment_brands: Vec::new(),
        }
    }

    /// Up to `limit` dominant visual-feature tokens, for display names.
    /// Helmet colors first, then boot colors, then clothing colors,
    /// sorted lexicographically.
    pub fn feature_tokens(&self, limit: usize) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .helmet_colors
            .iter()
            .chain(self.boot_colors.iter())
            .chain(self.clothing_colors.iter())
            .take(limit)
            .cloned()
            .collect();
        tokens.sort();
        tokens
    }
}

/// Kind of prompt issued against an image; part of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    /// Enumerate every subject in the frame.
    DetectSubjects,
    /// Describe the single primary subject (roster ingestion).
    DescribeFace,
}

impl PromptKind {
    /// Stable key used in the cache file.
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::DetectSubjects => "detect_subjects",
            PromptKind::DescribeFace => "describe_face",
        }
    }
}

/// Similarity verdict from the comparator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonScore {
    /// Similarity in [0, 1].
    pub similarity: f64,
    /// Qualitative justification; logged, never acted on.
    #[serde(default, alias = "reason")]
    pub reasoning: String,
}
