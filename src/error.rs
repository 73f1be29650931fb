use std::path::PathBuf;
use thiserror::Error;

/// Rejected option combinations. Raised once, before any file is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing work_dir")]
    MissingWorkDir,

    #[error("Not a directory: {path}")]
    NotADirectory { path: String },

    #[error("The skip_bigger works only with media_magic")]
    SkipBiggerWithoutMedia,

    #[error(
        "It does not make sense using invert_selection with this command. The work file has no file to compare to."
    )]
    InvertWithPairedAction,

    #[error("You cannot ignore everything.")]
    IgnoreEverything,

    #[error("Checksum cannot be counted when ignore_size.")]
    ChecksumWithoutSize,

    #[error("Choose either rename, delete or replace_with_original")]
    ConflictingActions,

    #[error("Use whole hours only: {value}")]
    InvalidTolerance { value: String },

    #[error("Tolerance range is reversed: {lo} > {hi}")]
    ReversedTolerance { lo: i64, hi: i64 },

    #[error("Invalid strip_suffix pattern {pattern}: {message}")]
    InvalidSuffixPattern { pattern: String, message: String },

    #[error("The file list seems to contain another directory than the originals: {path}")]
    ForeignFileList { path: String },
}

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Corrupt media {path}: {message}")]
    CorruptMedia { path: PathBuf, message: String },

    #[error("Probe tool {tool} is unavailable: {message}")]
    ProbeUnavailable { tool: String, message: String },

    #[error("Do not rename {from} because {to} exists.")]
    RenameCollision { from: PathBuf, to: PathBuf },
}

impl DedupError {
    pub fn corrupt(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        DedupError::CorruptMedia {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Broken media is skipped at once, even when the run should fail on errors.
    pub fn is_corrupt_media(&self) -> bool {
        matches!(self, DedupError::CorruptMedia { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DedupError::Io(_))
    }
}

pub type Result<T, E = DedupError> = std::result::Result<T, E>;
