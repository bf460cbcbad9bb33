//! Error type for restore planning and execution.

/// Failures raised while planning or running a restore.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    /// The server rejected a restore-collection, restore-data, or
    /// restore-indexes request, or a plain probe/handshake request failed.
    #[error("client error: {0}")]
    Client(#[from] crate::http::ClientError),

    /// The managed input directory failed.
    #[error("directory error: {0}")]
    Directory(#[from] crate::directory::DirectoryError),

    /// The worker pool could not be started.
    #[error("task queue error: {0}")]
    TaskQueue(#[from] crate::workers::TaskQueueError),

    /// `continue.json` could not be read or written.
    #[error("progress tracker error: {0}")]
    Progress(#[from] crate::progress::ProgressError),

    /// `dump.json` names a different database than the one being restored
    /// into, and `force_same_database` forbids the mismatch.
    #[error("dump was taken from database {dumped}, refusing to restore into {target} (force_same_database is set)")]
    DatabaseNameMismatch {
        /// Database name recorded in `dump.json`.
        dumped: String,
        /// Database name the restore is targeting.
        target: String,
    },

    /// The target database does not exist and either `create_database` was
    /// not set, or the create attempt itself failed.
    #[error("database {0} does not exist and could not be created")]
    DatabaseCreateFailed(String),

    /// A `<cname>.structure.json` file did not contain the expected
    /// `parameters`/`indexes` shape.
    #[error("malformed structure file for collection {collection}: {reason}")]
    MalformedStructureFile {
        /// Collection the structure file was for.
        collection: String,
        /// Human-readable reason.
        reason: String,
    },

    /// `restore-collection` failed and `force` was not set, so the
    /// collection's data and indexes were never attempted.
    #[error("failed to create collection {collection}: {reason}")]
    CollectionCreateFailed {
        /// Collection that could not be created.
        collection: String,
        /// Server-reported reason.
        reason: String,
    },

    /// A `restore-data` chunk send failed and `force` was not set.
    #[error("failed to send data chunk for collection {collection}: {reason}")]
    DataSendFailed {
        /// Collection the chunk belonged to.
        collection: String,
        /// Server-reported reason.
        reason: String,
    },

    /// `restore-indexes` failed and `force` was not set.
    #[error("failed to restore indexes for collection {collection}: {reason}")]
    IndexRestoreFailed {
        /// Collection the indexes belonged to.
        collection: String,
        /// Server-reported reason.
        reason: String,
    },

    /// A resumed collection's recorded `bytesAcked` watermark pointed past
    /// the end of its own input file, which should never happen for a
    /// watermark this crate itself wrote.
    #[error("resume offset {offset} for collection {collection} file {file_no} is out of range")]
    ResumeOffsetOutOfRange {
        /// Collection being resumed.
        collection: String,
        /// File number the offset was supposed to fall within.
        file_no: u32,
        /// The out-of-range offset itself.
        offset: u64,
    },

    /// Every collection job has finished but a stray clone of the shared
    /// worker queue outlived them, so the final shutdown pass could not take
    /// ownership of it. Indicates a bug in job teardown, not a transient
    /// condition.
    #[error("worker queue still had {0} outstanding reference(s) after all restore jobs completed")]
    TaskQueueStillShared(usize),
}
