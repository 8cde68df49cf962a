//! Persistent subject roster (database mode).
//!
//! A JSON document mapping subject names to canonical visual descriptions
//! and reference image paths. The on-disk shape stays readable by, and
//! readable from, earlier versions of the tool: legacy field names
//! (`facial_description`, `reference_image`, `added_date`) are accepted on
//! read and the modern names written back.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default roster file name, created in the working directory.
pub const DEFAULT_ROSTER_FILE: &str = "people.json";

/// One registered subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RosterEntry {
    /// Unique, case-preserving subject name.
    pub name: String,

    /// Canonical visual description from `describe_one_face`.
    #[serde(alias = "facial_description")]
    pub description: String,

    /// Reference image paths; at least one.
    #[serde(default)]
    pub reference_paths: Vec<PathBuf>,

    /// Legacy single-path field; folded into `reference_paths` on load.
    #[serde(default, skip_serializing)]
    reference_image: Option<PathBuf>,

    #[serde(default)]
    pub notes: String,

    #[serde(default = "Utc::now", alias = "added_date", deserialize_with = "lenient_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Accepts RFC 3339 or the zone-less ISO form older versions wrote.
fn lenient_datetime<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    raw.parse::<chrono::NaiveDateTime>()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RosterDocument {
    #[serde(default)]
    people: Vec<RosterEntry>,
}

/// Summary counters for the `stats` menu entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterStats {
    pub total: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Roster bound to its on-disk document.
pub struct Roster {
    path: PathBuf,
    entries: Vec<RosterEntry>,
}

impl Roster {
    /// Loads the roster at `path`, starting empty when absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => {
                let mut doc: RosterDocument =
                    serde_json::from_slice(&bytes).map_err(|source| CoreError::StateFile {
                        path: path.clone(),
                        source,
                    })?;
                for entry in &mut doc.people {
                    if let Some(legacy) = entry.reference_image.take() {
                        if !entry.reference_paths.contains(&legacy) {
                            entry.reference_paths.insert(0, legacy);
                        }
                    }
                }
                doc.people
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(CoreError::Io(e)),
        };
        Ok(Self { path, entries })
    }

    /// Writes the roster back atomically.
    pub fn save(&self) -> Result<()> {
        let doc = RosterDocument {
            people: self.entries.clone(),
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(
            &tmp,
            serde_json::to_vec_pretty(&doc).map_err(|source| CoreError::StateFile {
                path: self.path.clone(),
                source,
            })?,
        )?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Registers a subject with its canonical description (obtained from
    /// `describe_one_face`, usually via [`crate::engine::describe_face_cached`]).
    /// Validates the reference image and name uniqueness, then saves.
    pub fn add(
        &mut self,
        name: &str,
        reference_path: &Path,
        notes: &str,
        description: String,
    ) -> Result<RosterEntry> {
        if self.get(name).is_some() {
            return Err(CoreError::DuplicateRosterEntry(name.to_string()));
        }
        if !reference_path.exists() {
            return Err(CoreError::ReferenceImageMissing(reference_path.to_path_buf()));
        }

        info!(name, "registered roster subject");
        let entry = RosterEntry {
            name: name.to_string(),
            description,
            reference_paths: vec![reference_path.to_path_buf()],
            reference_image: None,
            notes: notes.to_string(),
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        self.save()?;
        Ok(entry)
    }

    /// Removes a subject by name, case-insensitively. Saves on success.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let before = self.entries.len();
        self.entries
            .retain(|e| !e.name.eq_ignore_ascii_case(name));
        if self.entries.len() == before {
            return Err(CoreError::RosterEntryNotFound(name.to_string()));
        }
        self.save()
    }

    /// Finds an entry by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&RosterEntry> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// All entries, registration order.
    pub fn list(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (name, description) pairs for the matcher.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.description.clone()))
            .collect()
    }

    pub fn stats(&self) -> RosterStats {
        RosterStats {
            total: self.entries.len(),
            oldest: self.entries.iter().map(|e| e.created_at).min(),
            newest: self.entries.iter().map(|e| e.created_at).max(),
        }
    }

    /// Integrity issues: missing reference images, duplicate names,
    /// empty descriptions.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for entry in &self.entries {
            if entry.reference_paths.is_empty() {
                issues.push(format!("'{}': no reference image recorded", entry.name));
            }
            for path in &entry.reference_paths {
                if !path.exists() {
                    issues.push(format!(
                        "'{}': reference image not found: {}",
                        entry.name,
                        path.display()
                    ));
                }
            }
            if entry.description.trim().is_empty() {
                issues.push(format!("'{}': empty description", entry.name));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.name.to_ascii_lowercase()) {
                issues.push(format!("duplicate name: '{}'", entry.name));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_legacy_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.json");
        std::fs::write(
            &path,
            serde_json::to_vec(&json!({
                "people": [{
                    "name": "Blue Racer",
                    "reference_image": "/photos/ref.jpg",
                    "facial_description": "white SMITH helmet, blue suit",
                    "notes": "",
                    "added_date": "2023-11-08T10:30:00"
                }]
            }))
            .unwrap(),
        )
        .unwrap();

        let roster = Roster::load(&path).unwrap();
        let entry = roster.get("blue racer").unwrap();
        assert_eq!(entry.description, "white SMITH helmet, blue suit");
        assert_eq!(
            entry.reference_paths,
            vec![PathBuf::from("/photos/ref.jpg")]
        );
        assert_eq!(entry.created_at.to_rfc3339(), "2023-11-08T10:30:00+00:00");
    }

    #[test]
    fn test_save_writes_modern_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.json");

        let mut roster = Roster::load(&path).unwrap();
        roster.entries.push(RosterEntry {
            name: "A".into(),
            description: "desc".into(),
            reference_paths: vec!["/a.jpg".into()],
            reference_image: None,
            notes: String::new(),
            created_at: Utc::now(),
        });
        roster.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw["people"][0]["description"].is_string());
        assert!(raw["people"][0]["reference_paths"].is_array());
        assert!(raw["people"][0].get("reference_image").is_none());
    }

    #[test]
    fn test_remove_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let mut roster = Roster::load(dir.path().join("p.json")).unwrap();
        roster.entries.push(RosterEntry {
            name: "Alice".into(),
            description: "d".into(),
            reference_paths: vec![],
            reference_image: None,
            notes: String::new(),
            created_at: Utc::now(),
        });

        assert!(roster.remove("Bob").is_err());
        assert!(roster.remove("ALICE").is_ok());
        assert!(roster.is_empty());
    }

    #[test]
    fn test_validate_reports_issues() {
        let dir = tempfile::tempdir().unwrap();
        let good_ref = dir.path().join("ref.jpg");
        std::fs::write(&good_ref, b"x").unwrap();

        let mut roster = Roster::load(dir.path().join("p.json")).unwrap();
        roster.entries.push(RosterEntry {
            name: "Ok".into(),
            description: "fine".into(),
            reference_paths: vec![good_ref],
            reference_image: None,
            notes: String::new(),
            created_at: Utc::now(),
        });
        roster.entries.push(RosterEntry {
            name: "Broken".into(),
            description: "".into(),
            reference_paths: vec![dir.path().join("gone.jpg")],
            reference_image: None,
            notes: String::new(),
            created_at: Utc::now(),
        });
        roster.entries.push(RosterEntry {
            name: "broken".into(),
            description: "dup".into(),
            reference_paths: vec![],
            reference_image: None,
            notes: String::new(),
            created_at: Utc::now(),
        });

        let issues = roster.validate();
        assert_eq!(issues.len(), 4);
        assert!(issues.iter().any(|i| i.contains("not found")));
        assert!(issues.iter().any(|i| i.contains("empty description")));
        assert!(issues.iter().any(|i| i.contains("duplicate name")));
        assert!(issues.iter().any(|i| i.contains("no reference image")));
    }
}
