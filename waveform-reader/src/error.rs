use efish_common::metrics::failures::FailureKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("Cannot enumerate directory entry: {0}")]
    Glob(#[from] glob::GlobError),
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot parse {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("File name {0} does not end in a shot number")]
    InvalidFileName(PathBuf),
    #[error("Malformed row at line {line} of {path}: {reason}")]
    MalformedRow {
        path: PathBuf,
        line: u64,
        reason: String,
    },
    #[error("File {0} contains no samples")]
    Empty(PathBuf),
    #[error("No shots found for channel {channel} in {directory}")]
    NoShots { channel: String, directory: PathBuf },
    #[error("No background file found for channel {channel} in {directory}")]
    BackgroundNotFound { channel: String, directory: PathBuf },
    #[error("Found {count} background files for channel {channel}, expected exactly one")]
    AmbiguousBackground { channel: String, count: usize },
    #[error("Loading was cancelled")]
    Cancelled,
}

impl LoadError {
    /// The failure metric label under which this error is counted.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::InvalidFileName(_) => FailureKind::InvalidFileName,
            Self::Io { .. } | Self::Glob(_) => FailureKind::UnreadableFile,
            _ => FailureKind::MalformedFile,
        }
    }
}
