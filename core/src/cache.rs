//! Persistent analysis cache.
//!
//! Content-addressed store guaranteeing at-most-once analysis per
//! (content-hash, prompt-kind) pair across the cache file's lifetime.
//! Loaded once at startup, mutated in memory, flushed every
//! `FLUSH_EVERY` new entries and at shutdown. Flushes write to a temp
//! file and rename into place under an exclusive lock, so a cancelled run
//! always leaves a consistent file. There is no eviction; deleting the
//! file forces recomputation.

use crate::detection::PromptKind;
use crate::error::{CoreError, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Default cache file name, created in the working directory.
pub const DEFAULT_CACHE_FILE: &str = ".analysis_cache.json";

/// New entries between automatic flushes.
const FLUSH_EVERY: usize = 5;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default = "schema_version")]
    version: u32,
    /// content-hash → prompt-kind → analysis payload.
    #[serde(default)]
    entries: HashMap<String, HashMap<String, Value>>,
}

fn schema_version() -> u32 {
    1
}

/// Hit/miss counters for the run report.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache (vision calls saved).
    pub hits: u64,
    /// Lookups that required a vision call.
    pub misses: u64,
}

/// In-memory cache bound to an on-disk JSON document.
pub struct AnalysisCache {
    path: PathBuf,
    doc: CacheDocument,
    pending: usize,
    stats: CacheStats,
}

impl AnalysisCache {
    /// Loads the cache at `path`, starting empty when the file is absent.
    /// A corrupt file is renamed aside and the cache starts fresh rather
    /// than failing the run.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CacheDocument>(&bytes) {
                Ok(doc) => {
                    info!(
                        path = %path.display(),
                        entries = doc.entries.len(),
                        "loaded analysis cache"
                    );
                    doc
                }
                Err(e) => {
                    warn!(path = %path.display(), %e, "cache file corrupt, starting fresh");
                    let aside = path.with_extension("json.corrupt");
                    let _ = std::fs::rename(&path, aside);
                    CacheDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheDocument::default(),
            Err(e) => return Err(CoreError::Io(e)),
        };
        Ok(Self {
            path,
            doc,
            pending: 0,
            stats: CacheStats::default(),
        })
    }

    /// Looks up a payload, counting the hit or miss.
    pub fn get(&mut self, content_hash: &str, kind: PromptKind) -> Option<Value> {
        let hit = self
            .doc
            .entries
            .get(content_hash)
            .and_then(|kinds| kinds.get(kind.as_str()))
            .cloned();
        if hit.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        hit
    }

    /// Stores a payload and flushes if enough entries accumulated.
    /// A failed flush is logged, not fatal; the next one supersedes it.
    pub fn put(&mut self, content_hash: &str, kind: PromptKind, payload: Value) {
        self.doc
            .entries
            .entry(content_hash.to_string())
            .or_default()
            .insert(kind.as_str().to_string(), payload);
        self.pending += 1;

        if self.pending >= FLUSH_EVERY {
            if let Err(e) = self.flush() {
                warn!(%e, "periodic cache flush failed; will retry on next flush");
            }
        }
    }

    /// Writes the document to disk atomically (temp file + rename) under
    /// an exclusive lock on the destination.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        lock.lock_exclusive()?;

        let result = self.write_atomic();
        let _ = FileExt::unlock(&lock);
        result?;

        debug!(
            path = %self.path.display(),
            entries = self.doc.entries.len(),
            "flushed analysis cache"
        );
        self.pending = 0;
        Ok(())
    }

    fn write_atomic(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&serde_json::to_vec_pretty(&self.doc).map_err(|source| {
                CoreError::StateFile {
                    path: self.path.clone(),
                    source,
                }
            })?)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Counters accumulated since load.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of distinct images with at least one cached analysis.
    pub fn len(&self) -> usize {
        self.doc.entries.len()
    }

    /// True when no image has a cached analysis.
    pub fn is_empty(&self) -> bool {
        self.doc.entries.is_empty()
    }
}

impl Drop for AnalysisCache {
    fn drop(&mut self) {
        if self.pending > 0 {
            if let Err(e) = self.flush() {
                warn!(%e, "cache flush on drop failed");
            }
        }
    }
}
