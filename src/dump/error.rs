//! Error type for dump planning and execution.

/// Failures raised while planning or running a dump.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    /// The server rejected a dump context request or a batch fetch.
    #[error("client error: {0}")]
    Client(#[from] crate::http::ClientError),

    /// The managed output directory failed.
    #[error("directory error: {0}")]
    Directory(#[from] crate::directory::DirectoryError),

    /// The worker pool could not be started.
    #[error("task queue error: {0}")]
    TaskQueue(#[from] crate::workers::TaskQueueError),

    /// A dump context's TTL expired before the slowest batch returned.
    #[error("dump context {0} expired before the batch completed")]
    ContextExpired(String),

    /// The server response to a batch fetch could not be parsed as the
    /// expected envelope (payload + `more` flag).
    #[error("malformed batch response for collection {collection}: {reason}")]
    MalformedBatch {
        /// Collection the batch belonged to.
        collection: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A collection's shard-distribution response could not be parsed as
    /// the expected `{shardId: [leader, ...follower]}` map.
    #[error("malformed shard distribution for collection {collection}: {reason}")]
    MalformedShardDistribution {
        /// Collection the distribution was requested for.
        collection: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Every collection/shard job has finished but a stray clone of the
    /// shared file provider outlived them, so the final file-close pass
    /// could not take ownership of it. Indicates a bug in job teardown,
    /// not a transient condition.
    #[error("file provider still had {0} outstanding reference(s) after all dump jobs completed")]
    FileProviderStillShared(usize),
}
