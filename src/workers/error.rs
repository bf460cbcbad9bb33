//! Error type for the worker pool.

/// Failures raised while starting, running, or tearing down the task queue.
#[derive(Debug, thiserror::Error)]
pub enum TaskQueueError {
    /// `spawn_workers` was called with zero worker threads.
    #[error("worker count must be non-zero")]
    ZeroWorkers,

    /// A worker thread panicked while running a job.
    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),

    /// The client used to seed a worker thread could not be connected.
    #[error("failed to connect worker client: {0}")]
    ClientSetup(#[from] crate::http::ClientError),

    /// `queue_job` was called after the queue had already been shut down.
    #[error("task queue has already been shut down")]
    Stopped,
}
