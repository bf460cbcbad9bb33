//! Fixed-capacity producer/consumer queue with graceful shutdown.
//!
//! Decouples a small number of high-latency network threads from a smaller
//! number of disk-writer threads at known backpressure. One [`std::sync::Mutex`]
//! plus two [`std::sync::Condvar`]s (write-blocked, read-blocked) guard a
//! [`std::collections::VecDeque`] used as a ring of bounded size; there is no
//! lock-free fast path because the workload is dominated by blocking I/O on
//! both ends, not by push/pop contention.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Re-checked every wait, so cooperative shutdown of a blocked push/pop is
/// always bounded rather than resting on a notification that could in
/// principle be missed.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct ChannelState<T> {
    queue: VecDeque<T>,
    capacity: usize,
    stopped: bool,
    num_producers: usize,
}

/// A fixed-capacity FIFO of owning handles to `T`, shared between producer
/// and consumer threads.
///
/// `push` blocks while the channel is full; `pop` blocks while the channel is
/// empty and not stopped. Once stopped, `pop` drains whatever remains and
/// then returns `None` forever. Both operations report whether they had to
/// block, which callers use to size worker-thread counts (see
/// [`dump::parallel_server`](crate::dump::parallel_server)).
pub struct BoundedChannel<T> {
    state: Mutex<ChannelState<T>>,
    write_cv: Condvar,
    read_cv: Condvar,
    blocked_pushes: AtomicU64,
    blocked_pops: AtomicU64,
}

/// Result of a [`BoundedChannel::push`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    /// `true` if the channel was stopped and the item was handed back to the caller.
    pub stopped: bool,
    /// `true` if this call had to wait for free capacity.
    pub blocked: bool,
}

/// Result of a [`BoundedChannel::pop`] call.
#[derive(Debug)]
pub struct PopOutcome<T> {
    /// The popped item, or `None` if the channel is stopped and drained.
    pub item: Option<T>,
    /// `true` if this call had to wait for an item.
    pub blocked: bool,
}

impl<T> BoundedChannel<T> {
    /// Creates a channel able to hold up to `capacity` items in flight.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; a zero-capacity channel can never
    /// satisfy a push and every caller of this crate treats that as a
    /// configuration bug rather than a recoverable condition.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedChannel capacity must be non-zero");
        Self {
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                stopped: false,
                num_producers: 0,
            }),
            write_cv: Condvar::new(),
            read_cv: Condvar::new(),
            blocked_pushes: AtomicU64::new(0),
            blocked_pops: AtomicU64::new(0),
        }
    }

    /// Registers one producer. Pair with [`BoundedChannel::producer_end`], or
    /// better, acquire a [`BoundedChannelProducerGuard`] so the decrement
    /// cannot be forgotten on an early return or panic.
    pub fn producer_begin(&self) {
        let mut state = self.lock();
        state.num_producers += 1;
    }

    /// Retires one producer. When the last producer retires, the channel
    /// auto-stops and wakes every waiting consumer and producer.
    pub fn producer_end(&self) {
        let mut state = self.lock();
        state.num_producers = state.num_producers.saturating_sub(1);
        if state.num_producers == 0 {
            state.stopped = true;
            self.write_cv.notify_all();
            self.read_cv.notify_all();
        }
    }

    /// Idempotently stops the channel, waking all waiters immediately.
    /// `pop` continues to drain any items already queued; `push` after this
    /// point always reports `stopped = true`.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.stopped = true;
        self.write_cv.notify_all();
        self.read_cv.notify_all();
    }

    /// Pushes `item` onto the channel, blocking until capacity is available
    /// or the channel is stopped. If stopped, `item` is returned to the
    /// caller inside the outcome's `stopped = true` state instead of the
    /// queue — this is exposed by returning it unchanged.
    ///
    /// Returns the item back only via `Err` to keep the happy path
    /// allocation-free; callers that need the item back on shutdown should
    /// check `stopped` and hold on to their own copy before calling push, or
    /// use [`BoundedChannel::try_push`].
    pub fn push(&self, item: T) -> PushOutcome {
        match self.try_push(item) {
            Ok(outcome) => outcome,
            Err((_item, outcome)) => outcome,
        }
    }

    /// Same contract as [`push`](Self::push), but returns the item back to
    /// the caller when the channel was stopped before it could be queued.
    pub fn try_push(&self, item: T) -> Result<PushOutcome, (T, PushOutcome)> {
        let mut state = self.lock();
        let mut blocked = false;
        loop {
            if state.stopped {
                let outcome = PushOutcome {
                    stopped: true,
                    blocked,
                };
                return Err((item, outcome));
            }
            if state.queue.len() < state.capacity {
                state.queue.push_back(item);
                self.read_cv.notify_one();
                let outcome = PushOutcome {
                    stopped: false,
                    blocked,
                };
                return Ok(outcome);
            }
            blocked = true;
            self.blocked_pushes.fetch_add(1, Ordering::Relaxed);
            let (next_state, _) =
                self.write_cv.wait_timeout(state, WAIT_POLL_INTERVAL).unwrap_or_else(|p| p.into_inner());
            state = next_state;
        }
    }

    /// Pops the next item, blocking until one is available or the channel is
    /// stopped and drained.
    pub fn pop(&self) -> PopOutcome<T> {
        let mut state = self.lock();
        let mut blocked = false;
        loop {
            if let Some(item) = state.queue.pop_front() {
                self.write_cv.notify_one();
                return PopOutcome {
                    item: Some(item),
                    blocked,
                };
            }
            if state.stopped {
                return PopOutcome {
                    item: None,
                    blocked,
                };
            }
            blocked = true;
            self.blocked_pops.fetch_add(1, Ordering::Relaxed);
            let (next_state, _) =
                self.read_cv.wait_timeout(state, WAIT_POLL_INTERVAL).unwrap_or_else(|p| p.into_inner());
            state = next_state;
        }
    }

    /// Current number of items queued (for telemetry only; racy by nature).
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// `true` if no items are currently queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cumulative count of `push` calls that had to wait for capacity.
    #[must_use]
    pub fn blocked_push_count(&self) -> u64 {
        self.blocked_pushes.load(Ordering::Relaxed)
    }

    /// Cumulative count of `pop` calls that had to wait for an item.
    #[must_use]
    pub fn blocked_pop_count(&self) -> u64 {
        self.blocked_pops.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelState<T>> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// RAII producer registration: calls [`BoundedChannel::producer_begin`] on
/// construction and [`BoundedChannel::producer_end`] on drop, mirroring the
/// original's `BoundedChannelProducerGuard` so `producerEnd` cannot be
/// forgotten on an early return or panic.
pub struct BoundedChannelProducerGuard<'a, T> {
    channel: &'a BoundedChannel<T>,
}

impl<'a, T> BoundedChannelProducerGuard<'a, T> {
    /// Registers a new producer on `channel` for the lifetime of this guard.
    #[must_use]
    pub fn new(channel: &'a BoundedChannel<T>) -> Self {
        channel.producer_begin();
        Self { channel }
    }
}

impl<T> Drop for BoundedChannelProducerGuard<'_, T> {
    fn drop(&mut self) {
        self.channel.producer_end();
    }
}
