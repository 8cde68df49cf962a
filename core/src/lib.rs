//! photosort-core: organize a directory tree of photographs into
//! per-subject subdirectories.
//!
//! The hard part is not the vision RPC, which is a typed façade in
//! [`vision`], but the auto-clustering engine in [`cluster`]: an online,
//! single-pass grouping of single-subject photos under a strict priority
//! protocol (capture-timestamp proximity first, weighted visual similarity
//! as fallback), backed by a persistent content-addressed [`cache`] that
//! bounds external calls, deterministic cluster naming, and reversible
//! file placement in [`execute`].
//!
//! The library never prints; terminal output belongs to the CLI.

pub mod cache;
pub mod cluster;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod execute;
pub mod matcher;
pub mod media;
pub mod plan;
pub mod report;
pub mod roster;
pub mod timestamp;
pub mod vision;

pub use cache::{AnalysisCache, DEFAULT_CACHE_FILE};
pub use config::{Config, ConfigError};
pub use engine::{organize, undo, OrganizeOptions, RunMode, RunSummary};
pub use error::{CoreError, MediaError, VisionError};
pub use execute::ExecutionMode;
pub use roster::{Roster, DEFAULT_ROSTER_FILE};
pub use vision::{AnthropicBackend, VisionBackend};
