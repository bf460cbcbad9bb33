//! Error type for the managed directory / managed file layer.

use std::path::PathBuf;

/// Failures produced while opening or operating on a [`super::ManagedDirectory`]
/// or one of its [`super::ManagedFile`] handles.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// `writable_file` was called with `overwrite=false` and the file already exists.
    #[error("file already exists: {0}")]
    FileExists(PathBuf),

    /// Directory policy forbids overwriting a non-empty directory.
    #[error("refusing to write into non-empty directory without overwrite: {0}")]
    CannotOverwriteDirectory(PathBuf),

    /// `readable_file` was called for a file that is not present.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// The directory's `ENCRYPTION` sidecar named a tag that requires a key,
    /// but no key was supplied when opening the directory.
    #[error("directory is encrypted with scheme '{0}' but no key was supplied")]
    EncryptionKeyRequired(String),

    /// The directory's `ENCRYPTION` sidecar named a tag this build does not
    /// recognize.
    #[error("unsupported encryption scheme: {0}")]
    UnsupportedEncryptionScheme(String),

    /// An encrypted chunk failed authentication (corruption or wrong key).
    #[error("failed to authenticate encrypted chunk at {path}: {reason}")]
    CodecAuthFailure {
        /// Path of the file being decrypted.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },

    /// Underlying filesystem I/O failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path the operation was performed against.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed while reading/writing a structured file.
    #[error("JSON error on {path}: {source}")]
    Json {
        /// Path of the file being (de)serialized.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl DirectoryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
