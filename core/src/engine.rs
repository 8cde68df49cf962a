//! Run orchestration.
//!
//! The pipeline per image: cache lookup → on miss, encode and call the
//! vision backend → cache store → classify (roster match or cluster
//! assignment) → plan → execute → report. Vision calls are the only
//! suspension points; images are processed in sorted enumeration order so
//! two runs over the same tree assign identically.

use crate::cache::AnalysisCache;
use crate::cluster::{Clusterer, NamedCluster};
use crate::config::Config;
use crate::detection::{PromptKind, SubjectDetection};
use crate::error::{CoreError, Result};
use crate::matcher::{classify_photo, PhotoDecision};
use crate::media;
use crate::plan::{self, Category, Placement};
use crate::report::{CategoryCounts, ClusterSummary, ImageOutcome, RunReport};
use crate::roster::Roster;
use crate::vision::VisionBackend;
use crate::execute::{self, ExecutionMode, ExecutionStats};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Which classification engine drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Match detections against the pre-registered roster.
    Database,
    /// Discover subjects by online clustering.
    AutoCluster,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Database => "database",
            RunMode::AutoCluster => "auto-cluster",
        }
    }
}

/// Options for one organize run.
#[derive(Debug, Clone)]
pub struct OrganizeOptions {
    pub source: PathBuf,
    pub output: PathBuf,
    pub mode: RunMode,
    pub execution: ExecutionMode,
    pub dry_run: bool,
    pub recursive: bool,
}

/// What a finished run looked like.
#[derive(Debug)]
pub struct RunSummary {
    pub report: RunReport,
    /// The plan, for dry-run display.
    pub placements: Vec<Placement>,
    /// True when at least one analysis or placement failed (exit code 3).
    pub partial_failure: bool,
}

/// Analysis result for one enumerated image.
enum Analyzed {
    Detections(Vec<SubjectDetection>),
    /// Decode failure: skipped entirely, recorded.
    Skipped(String),
    /// Vision failure after retries: routed to no-faces, recorded.
    Errored(String),
}

/// Runs the organize pipeline. Fatal errors (bad source, empty roster in
/// database mode, vision auth/quota) abort; everything else degrades into
/// the report.
pub async fn organize(
    options: &OrganizeOptions,
    config: &Config,
    backend: &dyn VisionBackend,
    cache: &mut AnalysisCache,
    roster: &Roster,
) -> Result<RunSummary> {
    if !options.source.is_dir() {
        return Err(CoreError::InvalidSource(options.source.clone()));
    }
    let threshold = config.threshold_for(options.mode);
    let roster_descriptions = match options.mode {
        RunMode::Database => {
            if roster.is_empty() {
                return Err(CoreError::EmptyRoster);
            }
            roster.descriptions()
        }
        RunMode::AutoCluster => Vec::new(),
    };

    let images = media::scan_images(&options.source, options.recursive)?;
    info!(
        count = images.len(),
        mode = options.mode.as_str(),
        threshold,
        "starting organize run"
    );

    // Analysis pass: detections per image, cache-first.
    let mut analyses: Vec<(PathBuf, Analyzed)> = Vec::with_capacity(images.len());
    let mut vision_errors: Vec<(PathBuf, String)> = Vec::new();
    let mut skipped: Vec<(PathBuf, String)> = Vec::new();
    for path in images {
        let analyzed = analyze_image(&path, config, backend, cache).await?;
        match &analyzed {
            Analyzed::Errored(e) => vision_errors.push((path.clone(), e.clone())),
            Analyzed::Skipped(e) => skipped.push((path.clone(), e.clone())),
            Analyzed::Detections(_) => {}
        }
        analyses.push((path, analyzed));
    }

    // Classification pass.
    let (outcomes, clusters, comparison_calls) = match options.mode {
        RunMode::Database => {
            let (outcomes, calls) =
                classify_database(&analyses, &roster_descriptions, threshold, backend).await?;
            (outcomes, Vec::new(), calls)
        }
        RunMode::AutoCluster => classify_auto(&analyses, config, threshold, backend).await?,
    };

    // Planning pass, in enumeration order.
    let mut placements = Vec::new();
    let mut counts = CategoryCounts::default();
    for outcome in &outcomes {
        counts.bump(&outcome.category);
        let placement = match (&outcome.category, &outcome.label) {
            (Category::SingleSubject, Some(label)) => {
                plan::place_single(outcome.path.clone(), label, &options.output)
            }
            (Category::MultipleSubjects, label) => plan::place_multiple_group(
                outcome.path.clone(),
                label.as_deref(),
                &options.output,
            ),
            (Category::UnknownSubjects, _) => {
                plan::place_unknown(outcome.path.clone(), &options.output)
            }
            _ => plan::place_no_faces(outcome.path.clone(), &options.output),
        };
        placements.push(placement);
    }

    let execution = if options.dry_run {
        ExecutionStats::default()
    } else {
        execute::execute(&placements, &options.output, options.execution)?
    };

    let partial_failure = !vision_errors.is_empty() || execution.failed > 0;
    let report = RunReport {
        mode: options.mode.as_str().to_string(),
        created_at: Utc::now(),
        dry_run: options.dry_run,
        config: config.clone(),
        effective_threshold: threshold,
        counts,
        execution,
        clusters: clusters
            .iter()
            .map(|c| ClusterSummary {
                name: c.name.clone(),
                members: c.members.len(),
            })
            .collect(),
        images: outcomes,
        vision_errors,
        skipped,
        cache: cache.stats(),
        comparison_calls,
    };

    if !options.dry_run {
        report.write(&options.output)?;
    }
    cache.flush()?;

    Ok(RunSummary {
        report,
        placements,
        partial_failure,
    })
}

/// Detections for one image, answering from the cache when possible.
async fn analyze_image(
    path: &Path,
    config: &Config,
    backend: &dyn VisionBackend,
    cache: &mut AnalysisCache,
) -> Result<Analyzed> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), %e, "unreadable image, skipping");
            return Ok(Analyzed::Skipped(e.to_string()));
        }
    };
    let hash = media::content_hash(&bytes);

    if let Some(cached) = cache.get(&hash, PromptKind::DetectSubjects) {
        match serde_json::from_value::<Vec<SubjectDetection>>(cached) {
            Ok(detections) => return Ok(Analyzed::Detections(detections)),
            Err(e) => warn!(path = %path.display(), %e, "cached analysis unreadable, re-analyzing"),
        }
    }

    let encoded = match media::prepare_bytes(path, &bytes, &config.image_limits) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!(path = %path.display(), %e, "decode failed, skipping");
            return Ok(Analyzed::Skipped(e.to_string()));
        }
    };

    match backend.detect_all_subjects(&encoded).await {
        Ok(detections) => {
            cache.put(&hash, PromptKind::DetectSubjects, json!(detections));
            Ok(Analyzed::Detections(detections))
        }
        Err(err) if err.is_fatal() => Err(CoreError::Vision(err)),
        Err(err) => {
            warn!(path = %path.display(), %err, "analysis failed after retries");
            Ok(Analyzed::Errored(err.to_string()))
        }
    }
}

/// Canonical description of a reference image, at most one vision call
/// per content hash across the cache lifetime.
pub async fn describe_face_cached(
    path: &Path,
    config: &Config,
    backend: &dyn VisionBackend,
    cache: &mut AnalysisCache,
) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|source| {
        CoreError::Media(crate::error::MediaError::Unreadable {
            path: path.to_path_buf(),
            source,
        })
    })?;
    let hash = media::content_hash(&bytes);

    if let Some(cached) = cache.get(&hash, PromptKind::DescribeFace) {
        if let Some(description) = cached.as_str() {
            return Ok(description.to_string());
        }
    }

    let encoded = media::prepare_bytes(path, &bytes, &config.image_limits)?;
    let description = backend.describe_one_face(&encoded).await?;
    cache.put(&hash, PromptKind::DescribeFace, json!(description));
    cache.flush()?;
    Ok(description)
}

async fn classify_database(
    analyses: &[(PathBuf, Analyzed)],
    roster: &[(String, String)],
    threshold: f64,
    backend: &dyn VisionBackend,
) -> Result<(Vec<ImageOutcome>, u64)> {
    let mut outcomes = Vec::with_capacity(analyses.len());
    let comparisons = roster.len() as u64;
    let mut calls = 0u64;

    for (path, analyzed) in analyses {
        let outcome = match analyzed {
            Analyzed::Skipped(_) => continue,
            Analyzed::Errored(e) => errored_outcome(path, e),
            Analyzed::Detections(detections) => {
                calls += comparisons * detections.len() as u64;
                match classify_photo(detections, roster, threshold, backend).await? {
                    PhotoDecision::NoFaces => ImageOutcome {
                        path: path.clone(),
                        category: Category::NoFaces,
                        label: None,
                        rule: None,
                        error: None,
                    },
                    PhotoDecision::SingleSubject { name } => ImageOutcome {
                        path: path.clone(),
                        category: Category::SingleSubject,
                        label: Some(name),
                        rule: None,
                        error: None,
                    },
                    PhotoDecision::UnknownSubjects => ImageOutcome {
                        path: path.clone(),
                        category: Category::UnknownSubjects,
                        label: None,
                        rule: None,
                        error: None,
                    },
                    PhotoDecision::MultipleSubjects { names } => ImageOutcome {
                        path: path.clone(),
                        category: Category::MultipleSubjects,
                        label: Some(plan::joined_group_name(&names)),
                        rule: None,
                        error: None,
                    },
                }
            }
        };
        outcomes.push(outcome);
    }
    Ok((outcomes, calls))
}

async fn classify_auto(
    analyses: &[(PathBuf, Analyzed)],
    config: &Config,
    threshold: f64,
    backend: &dyn VisionBackend,
) -> Result<(Vec<ImageOutcome>, Vec<NamedCluster>, u64)> {
    let mut clusterer = Clusterer::new(config.windows, threshold);
    // (index into outcomes, cluster id) for labeling after naming.
    let mut pending: Vec<(usize, u32)> = Vec::new();
    let mut outcomes: Vec<ImageOutcome> = Vec::new();

    for (path, analyzed) in analyses {
        match analyzed {
            Analyzed::Skipped(_) => continue,
            Analyzed::Errored(e) => outcomes.push(errored_outcome(path, e)),
            Analyzed::Detections(detections) => match detections.as_slice() {
                [] => outcomes.push(ImageOutcome {
                    path: path.clone(),
                    category: Category::NoFaces,
                    label: None,
                    rule: None,
                    error: None,
                }),
                [single] => {
                    let instant: Option<DateTime<Utc>> = crate::timestamp::capture_instant(path);
                    let assignment = clusterer
                        .assign(path.clone(), single.clone(), instant, backend)
                        .await?;
                    pending.push((outcomes.len(), assignment.cluster_id));
                    outcomes.push(ImageOutcome {
                        path: path.clone(),
                        category: Category::SingleSubject,
                        label: None, // filled in after naming
                        rule: assignment.rule,
                        error: None,
                    });
                }
                _ => outcomes.push(ImageOutcome {
                    path: path.clone(),
                    category: Category::MultipleSubjects,
                    label: None,
                    rule: None,
                    error: None,
                }),
            },
        }
    }

    let comparison_calls = clusterer.comparison_calls();
    let clusters = clusterer.finish();
    let names: HashMap<u32, String> = clusters
        .iter()
        .map(|c| (c.id, c.name.clone()))
        .collect();
    for (idx, cluster_id) in pending {
        outcomes[idx].label = names.get(&cluster_id).cloned();
    }

    Ok((outcomes, clusters, comparison_calls))
}

fn errored_outcome(path: &Path, error: &str) -> ImageOutcome {
    ImageOutcome {
        path: path.to_path_buf(),
        category: Category::NoFaces,
        label: None,
        rule: None,
        error: Some(error.to_string()),
    }
}

/// Re-export of the undo entry point; operates on the output root alone.
pub fn undo(output_root: &Path) -> Result<ExecutionStats> {
    execute::undo(output_root)
}
