//! Lock-free counters shared across worker threads for progress reporting.
//!
//! Every counter is a plain atomic behind a shared `Stats`; callers snapshot
//! with `load` at whatever cadence they want (CLI progress bar, a periodic
//! log line) without coordinating with the threads doing the counting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters updated by dump/restore jobs as they run.
#[derive(Default)]
pub struct Stats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    batches_transferred: AtomicU64,
    bytes_transferred: AtomicU64,
    documents_transferred: AtomicU64,
}

impl Stats {
    /// A fresh, zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one batch transfer of `bytes` bytes holding `documents` records.
    pub fn record_batch(&self, bytes: u64, documents: u64) {
        self.batches_transferred.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
        self.documents_transferred.fetch_add(documents, Ordering::Relaxed);
    }

    /// Total jobs that finished, success or failure.
    #[must_use]
    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    /// Total jobs that reported failure.
    #[must_use]
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Total batches moved across all jobs.
    #[must_use]
    pub fn batches_transferred(&self) -> u64 {
        self.batches_transferred.load(Ordering::Relaxed)
    }

    /// Total bytes moved across all jobs.
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    /// Total documents moved across all jobs.
    #[must_use]
    pub fn documents_transferred(&self) -> u64 {
        self.documents_transferred.load(Ordering::Relaxed)
    }
}
