//! Finds duplicates of a work directory among original files and renames,
//! deletes or replaces them, keeping the dates of both in sync.

pub mod action;
pub mod change;
pub mod config;
pub mod decision;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod index;
pub mod key;
pub mod matcher;
pub mod media;
pub mod metadata;
pub mod report;
pub mod retry;
pub mod stats;

pub use change::{Change, ChangeEntry};
pub use config::{Action, Config, HourTolerance, Options};
pub use engine::{Deduplicator, Disposition, RunOutcome};
pub use error::{ConfigError, DedupError, Result};
pub use media::{MediaProbe, StdProbe};
pub use retry::RetryPolicy;
pub use stats::RunStats;
