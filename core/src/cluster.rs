//! Online single-pass clustering of single-subject photos.
//!
//! Candidates are scored against every existing cluster under a strict
//! priority protocol: capture-timestamp proximity dominates, weighted
//! visual similarity is the fallback. Burst photography puts frames of
//! one subject fractions of a second apart and sequential gate shots
//! 5-30 s apart, while different subjects are minutes apart, so the
//! timestamp signal is both cheaper and more reliable than a vision call
//! whenever it exists. Bib numbers are never used for matching (model OCR
//! causes both false merges and false splits); they only name the cluster
//! afterwards.

use crate::config::TimestampWindows;
use crate::detection::SubjectDetection;
use crate::error::VisionError;
use crate::plan::sanitize_name;
use crate::vision::VisionBackend;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Sweep early-termination score: a candidate this close to a cluster
/// will not match another one better.
const EARLY_ACCEPT: f64 = 0.95;

/// Similarity floor granted by the high-priority timestamp window.
const WINDOW_FLOOR: f64 = 0.85;

/// Which protocol rule produced an assignment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentRule {
    /// Rule 1: instants within `T_EXACT`; score 1.0, comparator skipped.
    ExactTimestamp,
    /// Rule 2: instants within `T_HIGH`; score floored at 0.85.
    TimestampWindow,
    /// Rule 3: weighted visual similarity alone.
    VisualOnly,
}

/// Outcome of routing one image through the clusterer.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Id of the cluster joined or opened.
    pub cluster_id: u32,
    /// True when no existing cluster accepted the candidate.
    pub opened_new: bool,
    /// Rule behind the winning score; `None` for a fresh cluster.
    pub rule: Option<AssignmentRule>,
    /// The winning (or best rejected) score.
    pub score: f64,
}

/// One discovered subject grouping.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Monotone id, never reused within a run.
    pub id: u32,
    /// First member's detection; reference for all later comparisons.
    pub exemplar: SubjectDetection,
    /// Capture instant of the most recently joined member.
    pub last_instant: Option<DateTime<Utc>>,
    /// Member images in join order.
    pub members: Vec<PathBuf>,
    /// First non-null bib observed among members; naming hint only.
    pub bib_number: Option<String>,
}

/// A finished cluster with its collision-free display name.
#[derive(Debug, Clone)]
pub struct NamedCluster {
    pub id: u32,
    pub name: String,
    pub members: Vec<PathBuf>,
}

/// The clustering state machine.
pub struct Clusterer {
    clusters: Vec<Cluster>,
    next_id: u32,
    windows: TimestampWindows,
    threshold: f64,
    comparison_calls: u64,
    comparison_failures: u64,
}

impl Clusterer {
    pub fn new(windows: TimestampWindows, threshold: f64) -> Self {
        Self {
            clusters: Vec::new(),
            next_id: 1,
            windows,
            threshold,
            comparison_calls: 0,
            comparison_failures: 0,
        }
    }

    /// Routes one single-detection image: joins the best-scoring cluster
    /// at or above the threshold, otherwise opens a new one.
    ///
    /// The sweep visits clusters in creation order and only a strictly
    /// greater score displaces the incumbent, so ties go to the
    /// first-created cluster. A score at or above 0.95 ends the sweep
    /// early. Fatal vision errors propagate; a failed comparison scores
    /// 0.0 and the run continues.
    pub async fn assign(
        &mut self,
        path: PathBuf,
        detection: SubjectDetection,
        instant: Option<DateTime<Utc>>,
        backend: &dyn VisionBackend,
    ) -> Result<Assignment, VisionError> {
        let mut best: Option<(usize, f64, AssignmentRule)> = None;

        for idx in 0..self.clusters.len() {
            let (score, rule) = self.score_against(idx, &detection, instant, backend).await?;
            if best.map_or(true, |(_, best_score, _)| score > best_score) {
                best = Some((idx, score, rule));
            }
            if score >= EARLY_ACCEPT {
                debug!(cluster = self.clusters[idx].id, score, "early-accept match");
                break;
            }
        }

        match best {
            Some((idx, score, rule)) if score >= self.threshold => {
                let cluster = &mut self.clusters[idx];
                cluster.members.push(path);
                if let Some(seen) = &detection.bib_number {
                    match &cluster.bib_number {
                        None => cluster.bib_number = Some(seen.clone()),
                        Some(kept) if kept != seen => warn!(
                            cluster = cluster.id,
                            kept = %kept,
                            seen = %seen,
                            "conflicting bib observation; keeping the first"
                        ),
                        _ => {}
                    }
                }
                if instant.is_some() {
                    cluster.last_instant = instant;
                }
                debug!(cluster = cluster.id, score, ?rule, "joined cluster");
                Ok(Assignment {
                    cluster_id: cluster.id,
                    opened_new: false,
                    rule: Some(rule),
                    score,
                })
            }
            best => {
                let rejected = best.map(|(_, score, _)| score).unwrap_or(0.0);
                let id = self.next_id;
                self.next_id += 1;
                self.clusters.push(Cluster {
                    id,
                    exemplar: detection.clone(),
                    last_instant: instant,
                    members: vec![path],
                    bib_number: detection.bib_number.clone(),
                });
                debug!(cluster = id, best_rejected = rejected, "opened new cluster");
                Ok(Assignment {
                    cluster_id: id,
                    opened_new: true,
                    rule: None,
                    score: rejected,
                })
            }
        }
    }

    /// Scores a candidate against one cluster under the priority protocol.
    async fn score_against(
        &mut self,
        idx: usize,
        detection: &SubjectDetection,
        instant: Option<DateTime<Utc>>,
        backend: &dyn VisionBackend,
    ) -> Result<(f64, AssignmentRule), VisionError> {
        let cluster = &self.clusters[idx];

        // Millisecond distance; the window bounds are inclusive.
        let proximity = match (instant, cluster.last_instant) {
            (Some(t), Some(tc)) => Some((t - tc).num_milliseconds().unsigned_abs()),
            _ => None,
        };

        // Rule 1: same burst. No vision call.
        if let Some(millis) = proximity {
            if millis <= u64::from(self.windows.exact_seconds) * 1000 {
                return Ok((1.0, AssignmentRule::ExactTimestamp));
            }
        }

        let exemplar_description = cluster.exemplar.outfit_description.clone();
        let visual = self
            .visual_score(&detection.outfit_description, &exemplar_description, backend)
            .await?;

        // Rule 2: close enough in time that the visual score only gets a
        // floor, not a veto.
        if let Some(millis) = proximity {
            if millis <= u64::from(self.windows.high_seconds) * 1000 {
                return Ok((visual.max(WINDOW_FLOOR), AssignmentRule::TimestampWindow));
            }
        }

        Ok((visual, AssignmentRule::VisualOnly))
    }

    async fn visual_score(
        &mut self,
        candidate: &str,
        exemplar: &str,
        backend: &dyn VisionBackend,
    ) -> Result<f64, VisionError> {
        self.comparison_calls += 1;
        match backend.compare_two_descriptions(candidate, exemplar).await {
            Ok(verdict) => Ok(verdict.similarity.clamp(0.0, 1.0)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(%err, "comparison failed; scoring 0.0");
                self.comparison_failures += 1;
                Ok(0.0)
            }
        }
    }

    /// Comparator round-trips issued so far.
    pub fn comparison_calls(&self) -> u64 {
        self.comparison_calls
    }

    /// Comparator calls that failed non-fatally and scored 0.0.
    pub fn comparison_failures(&self) -> u64 {
        self.comparison_failures
    }

    /// Clusters in creation order. Exposed for invariant checks.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Ends the run: names every cluster, resolving collisions with
    /// numeric suffixes. No post-hoc merging happens here or anywhere.
    pub fn finish(self) -> Vec<NamedCluster> {
        let mut used: HashSet<String> = HashSet::new();
        let mut named = Vec::with_capacity(self.clusters.len());

        for cluster in self.clusters {
            let base = display_name(&cluster);
            let name = dedup_name(&base, &mut used);
            info!(
                cluster = cluster.id,
                name, members = cluster.members.len(), "finished cluster"
            );
            named.push(NamedCluster {
                id: cluster.id,
                name,
                members: cluster.members,
            });
        }
        named
    }
}

/// `Racer_Bib_<bib>` when any member carried a bib, else
/// `Outfit_<ordinal>[_<up to three exemplar feature tokens>]`.
fn display_name(cluster: &Cluster) -> String {
    if let Some(bib) = &cluster.bib_number {
        return sanitize_name(&format!("Racer_Bib_{bib}"));
    }

    let tokens = cluster.exemplar.feature_tokens(3);
    let base = if tokens.is_empty() {
        format!("Outfit_{}", cluster.id)
    } else {
        format!("Outfit_{}_{}", cluster.id, tokens.join("_"))
    };
    sanitize_name(&base)
}

fn dedup_name(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}_{suffix}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        suffix += 1;
    }
}
