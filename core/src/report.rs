//! Post-run report artifact.
//!
//! One JSON document per run, written to the output root: mode,
//! configuration snapshot, category counts, per-cluster member counts,
//! per-image outcomes, vision errors, and cache counters.

use crate::cache::CacheStats;
use crate::cluster::AssignmentRule;
use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::execute::ExecutionStats;
use crate::plan::Category;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Report file name inside the output root.
pub const REPORT_FILE: &str = "organization_log.json";

/// How one image left the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ImageOutcome {
    pub path: PathBuf,
    pub category: Category,
    /// Subject, group, or cluster token for the named categories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Clustering rule behind the assignment, auto mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<AssignmentRule>,
    /// Analysis error, when the image was routed on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate counts per category.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CategoryCounts {
    pub single_subject: usize,
    pub multiple_subjects: usize,
    pub unknown_subjects: usize,
    pub no_faces: usize,
}

impl CategoryCounts {
    pub fn bump(&mut self, category: &Category) {
        match category {
            Category::SingleSubject => self.single_subject += 1,
            Category::MultipleSubjects => self.multiple_subjects += 1,
            Category::UnknownSubjects => self.unknown_subjects += 1,
            Category::NoFaces => self.no_faces += 1,
        }
    }
}

/// Member count for one discovered cluster, auto mode only.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub members: usize,
}

/// The full run report.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub mode: String,
    pub created_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Configuration the run actually used.
    pub config: Config,
    pub effective_threshold: f64,
    pub counts: CategoryCounts,
    pub execution: ExecutionStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterSummary>,
    pub images: Vec<ImageOutcome>,
    /// (path, error) for analyses that failed after retries.
    pub vision_errors: Vec<(PathBuf, String)>,
    /// (path, error) for files that could not be read or decoded; these
    /// were skipped and never placed.
    pub skipped: Vec<(PathBuf, String)>,
    pub cache: CacheStats,
    /// Comparator round-trips issued this run.
    pub comparison_calls: u64,
}

impl RunReport {
    /// Writes the report into the output root.
    pub fn write(&self, output_root: &Path) -> Result<()> {
        let path = output_root.join(REPORT_FILE);
        std::fs::create_dir_all(output_root)?;
        std::fs::write(
            &path,
            serde_json::to_vec_pretty(self).map_err(|source| CoreError::StateFile {
                path: path.clone(),
                source,
            })?,
        )?;
        info!(path = %path.display(), "report written");
        Ok(())
    }
}
