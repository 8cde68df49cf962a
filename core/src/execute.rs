//! Placement execution and undo.
//!
//! Placements run in order: create the destination directory, resolve a
//! collision-free file name, copy or move, record the manifest entry. A
//! failed placement is logged and counted, never aborting the run. The
//! manifest is written atomically after the last placement; undo replays
//! it in reverse of the operation (move back, or delete the copy), prunes
//! empty category directories, and removes the manifest when everything
//! restored cleanly.

use crate::error::{CoreError, Result};
use crate::plan::Placement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Manifest file name, hidden inside the output root.
pub const MANIFEST_FILE: &str = ".original_paths.json";

/// Whether files are copied or moved into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Copy,
    Move,
}

/// One executed placement, sufficient to restore the original state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Where the file landed.
    pub destination: PathBuf,
    /// Where it came from.
    pub original: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    #[serde(default = "manifest_version")]
    version: u32,
    mode: ExecutionMode,
    created_at: DateTime<Utc>,
    /// Entries in placement order.
    operations: Vec<ManifestEntry>,
}

fn manifest_version() -> u32 {
    1
}

/// Counters from an execution or undo pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ExecutionStats {
    pub succeeded: usize,
    pub failed: usize,
    /// (source path, error) for each failed operation.
    pub failures: Vec<(PathBuf, String)>,
}

impl ExecutionStats {
    fn record_failure(&mut self, path: &Path, err: impl std::fmt::Display) {
        warn!(path = %path.display(), %err, "placement failed");
        self.failed += 1;
        self.failures.push((path.to_path_buf(), err.to_string()));
    }
}

/// Executes placements and writes the manifest. Individual failures are
/// recorded in the returned stats; only manifest I/O is fatal.
pub fn execute(
    placements: &[Placement],
    output_root: &Path,
    mode: ExecutionMode,
) -> Result<ExecutionStats> {
    let mut stats = ExecutionStats::default();
    let mut operations = Vec::with_capacity(placements.len());

    std::fs::create_dir_all(output_root)?;

    for placement in placements {
        match execute_one(placement, mode) {
            Ok(destination) => {
                stats.succeeded += 1;
                operations.push(ManifestEntry {
                    destination,
                    original: placement.source.clone(),
                });
            }
            Err(e) => stats.record_failure(&placement.source, e),
        }
    }

    write_manifest(
        output_root,
        &Manifest {
            version: manifest_version(),
            mode,
            created_at: Utc::now(),
            operations,
        },
    )?;

    info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        "execution finished"
    );
    Ok(stats)
}

fn execute_one(placement: &Placement, mode: ExecutionMode) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(&placement.directory)?;

    let file_name = placement
        .source
        .file_name()
        .ok_or_else(|| std::io::Error::other("source has no file name"))?;
    let destination = unique_destination(&placement.directory.join(file_name));

    match mode {
        ExecutionMode::Copy => {
            std::fs::copy(&placement.source, &destination)?;
        }
        ExecutionMode::Move => move_file(&placement.source, &destination)?,
    }
    Ok(destination)
}

/// Rename, falling back to copy+remove across filesystems.
fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    match std::fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(source, destination)?;
            std::fs::remove_file(source)
        }
    }
}

/// First free variant of `wanted`: `name.jpg`, `name_001.jpg`, ...
fn unique_destination(wanted: &Path) -> PathBuf {
    if !wanted.exists() {
        return wanted.to_path_buf();
    }
    let stem = wanted
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = wanted
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = wanted.parent().unwrap_or_else(|| Path::new(""));

    let mut counter = 1u32;
    loop {
        let candidate = parent.join(format!("{stem}_{counter:03}{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn write_manifest(output_root: &Path, manifest: &Manifest) -> Result<()> {
    let path = output_root.join(MANIFEST_FILE);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(
        &tmp,
        serde_json::to_vec_pretty(manifest).map_err(|source| CoreError::StateFile {
            path: path.clone(),
            source,
        })?,
    )?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

fn read_manifest(output_root: &Path) -> Result<Manifest> {
    let path = output_root.join(MANIFEST_FILE);
    let bytes = std::fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CoreError::ManifestMissing(path.clone())
        } else {
            CoreError::Io(e)
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CoreError::StateFile { path, source })
}

/// Replays the manifest: moved files go back, copies are deleted. Empty
/// category directories are pruned and the manifest removed after a clean
/// restore. Missing manifest is a user error.
pub fn undo(output_root: &Path) -> Result<ExecutionStats> {
    let manifest = read_manifest(output_root)?;
    let mut stats = ExecutionStats::default();

    info!(
        operations = manifest.operations.len(),
        mode = ?manifest.mode,
        "restoring original layout"
    );

    for entry in &manifest.operations {
        if !entry.destination.exists() {
            stats.record_failure(&entry.destination, "destination no longer exists");
            continue;
        }
        let result = match manifest.mode {
            ExecutionMode::Copy => std::fs::remove_file(&entry.destination),
            ExecutionMode::Move => {
                let mkdir = entry
                    .original
                    .parent()
                    .map(std::fs::create_dir_all)
                    .unwrap_or(Ok(()));
                mkdir.and_then(|()| move_file(&entry.destination, &entry.original))
            }
        };
        match result {
            Ok(()) => stats.succeeded += 1,
            Err(e) => stats.record_failure(&entry.destination, e),
        }
    }

    prune_empty_dirs(output_root);

    if stats.failed == 0 {
        std::fs::remove_file(output_root.join(MANIFEST_FILE))?;
    } else {
        warn!(
            failed = stats.failed,
            "undo incomplete; manifest kept for another attempt"
        );
    }
    Ok(stats)
}

/// Removes now-empty directories under the output root, deepest first.
fn prune_empty_dirs(output_root: &Path) {
    let mut dirs: Vec<PathBuf> = walkdir::WalkDir::new(output_root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        // Fails on non-empty directories, which is exactly the filter.
        let _ = std::fs::remove_dir(&dir);
    }
}
