//! Placement planning.
//!
//! Converts per-photo decisions into `(source, destination)` placements
//! under the fixed output layout:
//!
//! ```text
//! <output>/
//!   <Name>/                          single subject
//!   Multiple_People/<Joined_Names>/  two or more detections
//!   Unknown_Faces/
//!   No_Faces_Detected/
//! ```
//!
//! A dry-run plan is just the placement list; execution additionally
//! resolves file-name collisions and records the undo manifest.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Directory for photos with two or more detections.
pub const MULTIPLE_PEOPLE_DIR: &str = "Multiple_People";
/// Directory for single unmatched subjects.
pub const UNKNOWN_FACES_DIR: &str = "Unknown_Faces";
/// Directory for photos with no detections.
pub const NO_FACES_DIR: &str = "No_Faces_Detected";

/// Destination category of a placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SingleSubject,
    MultipleSubjects,
    UnknownSubjects,
    NoFaces,
}

/// One planned file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Absolute source path.
    pub source: PathBuf,
    pub category: Category,
    /// Subject or group token; present for the named categories.
    pub name: Option<String>,
    /// Destination directory (not yet the final file path; collisions are
    /// resolved against the filesystem at execution time).
    pub directory: PathBuf,
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`. Empty
/// input becomes `Unknown`.
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('.').to_string();
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed
    }
}

/// Joins group member names into a directory token.
pub fn joined_group_name(names: &[String]) -> String {
    names
        .iter()
        .map(|n| sanitize_name(n))
        .collect::<Vec<_>>()
        .join("_")
}

/// Builds the placement for a single-subject photo.
pub fn place_single(source: PathBuf, name: &str, output_root: &Path) -> Placement {
    let safe = sanitize_name(name);
    Placement {
        source,
        category: Category::SingleSubject,
        directory: output_root.join(&safe),
        name: Some(safe),
    }
}

/// Builds the placement for a multi-subject photo.
pub fn place_multiple(source: PathBuf, names: &[String], output_root: &Path) -> Placement {
    place_multiple_group(source, Some(&joined_group_name(names)), output_root)
}

/// Multi-subject placement by pre-joined group token. `None` (auto mode,
/// where subjects have no names) lands in `Multiple_People/` directly.
pub fn place_multiple_group(
    source: PathBuf,
    group: Option<&str>,
    output_root: &Path,
) -> Placement {
    let base = output_root.join(MULTIPLE_PEOPLE_DIR);
    match group {
        Some(token) => {
            let safe = sanitize_name(token);
            Placement {
                source,
                category: Category::MultipleSubjects,
                directory: base.join(&safe),
                name: Some(safe),
            }
        }
        None => Placement {
            source,
            category: Category::MultipleSubjects,
            name: None,
            directory: base,
        },
    }
}

/// Builds the placement for a single unmatched subject.
pub fn place_unknown(source: PathBuf, output_root: &Path) -> Placement {
    Placement {
        source,
        category: Category::UnknownSubjects,
        name: None,
        directory: output_root.join(UNKNOWN_FACES_DIR),
    }
}

/// Builds the placement for a photo with no detections.
pub fn place_no_faces(source: PathBuf, output_root: &Path) -> Placement {
    Placement {
        source,
        category: Category::NoFaces,
        name: None,
        directory: output_root.join(NO_FACES_DIR),
    }
}
