//! Top-level error type aggregating every component's error enum.
//!
//! Each component (directory, http, workers, progress, dump, restore) owns a
//! `thiserror`-derived enum scoped to its own failure modes. Engines collect
//! these into [`CoreError`] at the boundary where a job result is reported
//! back to the task queue; CLI binaries convert a [`CoreError`] into a
//! process exit code via `anyhow`.

use crate::directory::DirectoryError;
use crate::dump::DumpError;
use crate::http::ClientError;
use crate::progress::ProgressError;
use crate::restore::RestoreError;
use crate::workers::TaskQueueError;

/// Aggregate error type returned from the top-level dump/restore entry points.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The managed directory or one of its files failed.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Client construction, handshake, or response classification failed.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// The worker pool could not be started or torn down cleanly.
    #[error("task queue error: {0}")]
    TaskQueue(#[from] TaskQueueError),

    /// The progress tracker could not read or write `continue.json`.
    #[error("progress tracker error: {0}")]
    Progress(#[from] ProgressError),

    /// A dump-specific planning or job failure.
    #[error("dump error: {0}")]
    Dump(#[from] DumpError),

    /// A restore-specific planning or job failure.
    #[error("restore error: {0}")]
    Restore(#[from] RestoreError),

    /// One or more collection/shard jobs failed; this variant carries the
    /// first error observed by the engine while the remainder of the queue
    /// was cleared, matching the original client's "report first error"
    /// propagation rule.
    #[error("{count} job(s) failed, first error: {first}")]
    JobsFailed {
        /// Total number of jobs that reported failure.
        count: usize,
        /// The first failure observed, already formatted.
        first: String,
    },
}

/// Shared helper: collect a worker-error list into a `CoreError::JobsFailed`,
/// or `Ok(())` if the list is empty. Used identically by the dump and
/// restore engines (see `dump::engine::DumpEngine::finish` and
/// `restore::engine::RestoreEngine::finish`).
pub(crate) fn first_error_or_ok(errors: &[String]) -> Result<(), CoreError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::JobsFailed {
            count: errors.len(),
            first: errors[0].clone(),
        })
    }
}
