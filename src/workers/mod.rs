//! A pool of worker threads, each owning one HTTP client, draining a shared
//! job queue.
//!
//! Mirrors the network-thread half of the original's parallel dump/restore
//! servers: a fixed number of OS threads each hold one connected client and
//! pull [`Job`]s off a [`crate::channel::BoundedChannel`] until told to
//! stop. Kept generic over `Job` rather than specific to dump or restore so
//! both engines share one implementation.

mod error;
mod job;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub use error::TaskQueueError;
pub use job::Job;

use crate::channel::BoundedChannel;
use crate::http::{ConnectionOptions, ManagedClient};
use crate::stats::Stats;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// N worker threads, each with its own [`ManagedClient`], draining a
/// shared bounded queue of [`Job`]s.
pub struct ClientTaskQueue {
    channel: Arc<BoundedChannel<Box<dyn Job>>>,
    handles: Vec<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    idle_gate: Arc<(Mutex<()>, Condvar)>,
    errors: Arc<Mutex<Vec<String>>>,
    stats: Arc<Stats>,
}

impl ClientTaskQueue {
    /// Connects `worker_count` clients against `connection_options` and
    /// spawns one thread per client, all draining a queue of capacity
    /// `queue_capacity`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskQueueError::ZeroWorkers`] if `worker_count` is zero, or
    /// [`TaskQueueError::ClientSetup`] if any client fails to connect (no
    /// threads are spawned in that case).
    pub fn spawn_workers(
        worker_count: usize,
        queue_capacity: usize,
        connection_options: &ConnectionOptions,
        stats: Arc<Stats>,
    ) -> Result<Self, TaskQueueError> {
        if worker_count == 0 {
            return Err(TaskQueueError::ZeroWorkers);
        }

        let mut clients = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            clients.push(ManagedClient::connect(connection_options.clone())?);
        }

        let channel = Arc::new(BoundedChannel::new(queue_capacity));
        let stopping = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let idle_gate = Arc::new((Mutex::new(()), Condvar::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let handles = clients
            .into_iter()
            .enumerate()
            .map(|(worker_id, client)| {
                spawn_worker_thread(
                    worker_id,
                    client,
                    Arc::clone(&channel),
                    Arc::clone(&stopping),
                    Arc::clone(&active),
                    Arc::clone(&idle_gate),
                    Arc::clone(&errors),
                    Arc::clone(&stats),
                )
            })
            .collect();

        Ok(Self { channel, handles, stopping, active, idle_gate, errors, stats })
    }

    /// Enqueues `job`, blocking if the queue is at capacity.
    ///
    /// # Errors
    ///
    /// Returns [`TaskQueueError::Stopped`] if the queue has already shut down.
    pub fn queue_job(&self, job: Box<dyn Job>) -> Result<(), TaskQueueError> {
        match self.channel.try_push(job) {
            Ok(_) => Ok(()),
            Err(_) => Err(TaskQueueError::Stopped),
        }
    }

    /// Blocks until every queued job has been picked up and every worker
    /// has finished running its current job.
    ///
    /// Polls rather than relying purely on condvar notification, so a job
    /// queued concurrently with a call to this method can never be missed.
    pub fn wait_for_idle(&self) {
        let (lock, cv) = &*self.idle_gate;
        let mut guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if self.active.load(Ordering::SeqCst) == 0 && self.channel.is_empty() {
                return;
            }
            let (next_guard, _) = cv
                .wait_timeout(guard, IDLE_POLL_INTERVAL)
                .unwrap_or_else(|p| p.into_inner());
            guard = next_guard;
        }
    }

    /// Drops every job currently sitting in the queue without running it.
    /// Returns how many were discarded. Best-effort: a job a worker has
    /// already popped keeps running.
    pub fn clear_queue(&self) -> usize {
        let mut cleared = 0;
        while !self.channel.is_empty() {
            if self.channel.pop().item.is_none() {
                break;
            }
            cleared += 1;
        }
        cleared
    }

    /// Errors reported by jobs run so far, in the order they completed.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// The shared counter set every worker updates.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Signals every worker to stop after its current job and waits for
    /// them to exit.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        self.stopping.store(true, Ordering::Release);
        self.channel.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ClientTaskQueue {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker_thread(
    worker_id: usize,
    mut client: ManagedClient,
    channel: Arc<BoundedChannel<Box<dyn Job>>>,
    stopping: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    idle_gate: Arc<(Mutex<()>, Condvar)>,
    errors: Arc<Mutex<Vec<String>>>,
    stats: Arc<Stats>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("dumpkit-worker-{worker_id}"))
        .spawn(move || {
            loop {
                if stopping.load(Ordering::Acquire) {
                    break;
                }
                let outcome = channel.pop();
                let Some(job) = outcome.item else {
                    break;
                };
                active.fetch_add(1, Ordering::SeqCst);
                match job.run(&mut client) {
                    Ok(()) => stats.record_job_completed(),
                    Err(message) => {
                        stats.record_job_failed();
                        errors.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(message);
                    }
                }
                let remaining = active.fetch_sub(1, Ordering::SeqCst) - 1;
                if remaining == 0 && channel.is_empty() {
                    let (_lock, cv) = &*idle_gate;
                    cv.notify_all();
                }
            }
        })
        .expect("failed to spawn worker thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingJob {
        counter: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Job for CountingJob {
        fn run(&self, _client: &mut ManagedClient) -> Result<(), String> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("synthetic failure".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn mock_connection_options() -> (MockServer, ConnectionOptions, tokio::runtime::Runtime) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/_db/_system/_api/version"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "3.11.0"})))
                .mount(&server)
                .await;
            server
        });
        let options = ConnectionOptions {
            base_url: server.uri(),
            database: "_system".into(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(5),
            force: false,
        };
        (server, options, rt)
    }

    #[test]
    fn runs_every_queued_job() {
        let (_server, options, _rt) = mock_connection_options();
        let queue = ClientTaskQueue::spawn_workers(3, 8, &options, Arc::new(Stats::new())).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            queue
                .queue_job(Box::new(CountingJob { counter: Arc::clone(&counter), fail: false }))
                .unwrap();
        }
        queue.wait_for_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(queue.stats().jobs_completed(), 20);
        assert!(queue.errors().is_empty());
    }

    #[test]
    fn collects_job_errors() {
        let (_server, options, _rt) = mock_connection_options();
        let queue = ClientTaskQueue::spawn_workers(2, 4, &options, Arc::new(Stats::new())).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        queue
            .queue_job(Box::new(CountingJob { counter: Arc::clone(&counter), fail: true }))
            .unwrap();
        queue
            .queue_job(Box::new(CountingJob { counter: Arc::clone(&counter), fail: false }))
            .unwrap();
        queue.wait_for_idle();
        assert_eq!(queue.errors().len(), 1);
        assert_eq!(queue.stats().jobs_failed(), 1);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let (_server, options, _rt) = mock_connection_options();
        let err = ClientTaskQueue::spawn_workers(0, 4, &options, Arc::new(Stats::new())).unwrap_err();
        assert!(matches!(err, TaskQueueError::ZeroWorkers));
    }

    #[test]
    fn shutdown_stops_accepting_new_jobs() {
        let (_server, options, _rt) = mock_connection_options();
        let queue = ClientTaskQueue::spawn_workers(1, 4, &options, Arc::new(Stats::new())).unwrap();
        queue.wait_for_idle();
        queue.shutdown();
    }
}
