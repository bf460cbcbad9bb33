//! Per-collection coordination between one [`super::jobs::RestoreMainJob`]
//! and the [`super::jobs::RestoreSendJob`]s it dispatches, plus the buffer
//! pool chunks are leased from.
//!
//! The main job keeps reading its input file(s) while already-cut chunks are
//! sent concurrently by sibling jobs on other workers; this is the piece
//! that lets the main job know, without blocking after every chunk, which
//! watermark is safe to persist and when the whole collection is done.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::progress::BytesAcked;

/// Re-checked every wait, so a spurious missed wakeup never blocks the
/// drain past this long -- mirrors [`crate::workers::ClientTaskQueue`]'s
/// `wait_for_idle` poll loop.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Inner {
    /// `(fileNo, readOffset)` -> chunk length, for every chunk dispatched
    /// but not yet acknowledged by the server.
    in_flight: BTreeMap<(u32, u64), u64>,
    /// End-of-input watermark: the offset just past the last byte any chunk
    /// has ever been cut at, updated as chunks are cut (not as they ack).
    end_of_input: BytesAcked,
    read_complete: bool,
    first_error: Option<String>,
}

/// Shared state for one collection's restore, covering every chunk in
/// flight across the worker pool.
pub(super) struct SharedCollectionState {
    inner: Mutex<Inner>,
    drained: Condvar,
}

impl SharedCollectionState {
    pub(super) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                in_flight: BTreeMap::new(),
                end_of_input: BytesAcked::default(),
                read_complete: false,
                first_error: None,
            }),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers a chunk about to be sent (either inline or via a sibling
    /// job), before it is actually dispatched.
    pub(super) fn begin_chunk(&self, file_no: u32, offset: u64, length: u64) {
        let mut inner = self.lock();
        inner.in_flight.insert((file_no, offset), length);
        let candidate = BytesAcked { file_no, read_offset: offset + length };
        if (candidate.file_no, candidate.read_offset) > (inner.end_of_input.file_no, inner.end_of_input.read_offset) {
            inner.end_of_input = candidate;
        }
    }

    /// Marks a chunk as acknowledged by the server, returning the watermark
    /// now safe to persist: the lowest offset still in flight, or the
    /// end-of-input watermark if nothing remains in flight.
    pub(super) fn complete_chunk(&self, file_no: u32, offset: u64) -> BytesAcked {
        let mut inner = self.lock();
        inner.in_flight.remove(&(file_no, offset));
        let watermark = Self::watermark(&inner);
        self.drained.notify_all();
        watermark
    }

    fn watermark(inner: &Inner) -> BytesAcked {
        inner
            .in_flight
            .keys()
            .next()
            .map(|&(file_no, read_offset)| BytesAcked { file_no, read_offset })
            .unwrap_or(inner.end_of_input)
    }

    /// Records the first error reported by any sibling job; later errors are
    /// discarded (matches the "first error wins" rule used everywhere else
    /// in this crate).
    pub(super) fn record_error(&self, message: String) {
        let mut inner = self.lock();
        inner.first_error.get_or_insert(message);
        self.drained.notify_all();
    }

    /// Marks that the main job has read every byte of the collection's
    /// input, i.e. no further chunks will ever be registered.
    pub(super) fn mark_read_complete(&self) {
        let mut inner = self.lock();
        inner.read_complete = true;
        self.drained.notify_all();
    }

    /// Blocks until every dispatched chunk has been acknowledged, returning
    /// the first error reported (if any).
    pub(super) fn wait_for_drain(&self) -> Option<String> {
        let mut inner = self.lock();
        while !inner.in_flight.is_empty() {
            let (next_inner, _) = self
                .drained
                .wait_timeout(inner, DRAIN_POLL_INTERVAL)
                .unwrap_or_else(|p| p.into_inner());
            inner = next_inner;
        }
        inner.first_error.clone()
    }

    /// Whether every chunk has been read, dispatched, and acknowledged with
    /// no sibling failure -- the condition for marking the collection fully
    /// [`crate::progress::CollectionState::Restored`].
    pub(super) fn is_fully_restored(&self) -> bool {
        let inner = self.lock();
        inner.read_complete && inner.in_flight.is_empty() && inner.first_error.is_none()
    }
}

/// A small pool of reusable chunk buffers, avoiding an allocation per
/// `restore-data` chunk under steady-state streaming.
pub(super) struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub(super) fn new() -> Self {
        Self { buffers: Mutex::new(Vec::new()) }
    }

    /// Leases a buffer with at least `min_capacity` bytes of capacity,
    /// reusing a returned one if a suitable one is available.
    pub(super) fn lease_buffer(&self, min_capacity: usize) -> Vec<u8> {
        let mut buffers = self.buffers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(position) = buffers.iter().position(|buf| buf.capacity() >= min_capacity) {
            let mut buffer = buffers.swap_remove(position);
            buffer.clear();
            return buffer;
        }
        Vec::with_capacity(min_capacity)
    }

    /// Returns a buffer for reuse by a later [`Self::lease_buffer`] call.
    pub(super) fn return_buffer(&self, buffer: Vec<u8>) {
        let mut buffers = self.buffers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        buffers.push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_is_end_of_input_once_drained() {
        let state = SharedCollectionState::new();
        state.begin_chunk(0, 0, 100);
        state.begin_chunk(0, 100, 50);
        state.complete_chunk(0, 0);
        let watermark = state.complete_chunk(0, 100);
        assert_eq!(watermark, BytesAcked { file_no: 0, read_offset: 150 });
    }

    #[test]
    fn watermark_stays_at_lowest_in_flight_offset() {
        let state = SharedCollectionState::new();
        state.begin_chunk(0, 0, 100);
        state.begin_chunk(0, 100, 50);
        let watermark = state.complete_chunk(0, 100);
        assert_eq!(watermark, BytesAcked { file_no: 0, read_offset: 0 });
    }

    #[test]
    fn fully_restored_requires_read_complete_and_empty_in_flight_and_no_error() {
        let state = SharedCollectionState::new();
        state.begin_chunk(0, 0, 10);
        assert!(!state.is_fully_restored());
        state.complete_chunk(0, 0);
        assert!(!state.is_fully_restored());
        state.mark_read_complete();
        assert!(state.is_fully_restored());
        state.record_error("boom".to_string());
        assert!(!state.is_fully_restored());
    }

    #[test]
    fn buffer_pool_reuses_returned_buffers() {
        let pool = BufferPool::new();
        let buf = pool.lease_buffer(64);
        let ptr = buf.as_ptr();
        pool.return_buffer(buf);
        let reused = pool.lease_buffer(32);
        assert_eq!(reused.as_ptr(), ptr);
    }
}
