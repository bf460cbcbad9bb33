//! Error type for the resume-state tracker.

use std::path::PathBuf;

/// Failures raised while reading or writing `continue.json`.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// `continue.json` exists but its `version` field is newer than this
    /// build understands.
    #[error("continue.json version {found} is not supported (expected {expected})")]
    UnsupportedContinuationVersion {
        /// Version recorded in the file.
        found: u32,
        /// Version this build knows how to read.
        expected: u32,
    },

    /// The directory layer failed to read or write the file.
    #[error("directory error: {0}")]
    Directory(#[from] crate::directory::DirectoryError),

    /// I/O error unrelated to the managed directory layer (used by callers
    /// outside `directory` that still need to surface a path).
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path the operation was performed against.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
