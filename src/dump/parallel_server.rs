//! Higher-throughput cluster dump path: `W` network threads pulling batches
//! concurrently from one dump context, funnelled through a bounded channel
//! to `R` writer threads.
//!
//! Dispatched as one job per (collection, DBserver) pair in cluster mode
//! when the collection is large enough to warrant internal parallelism;
//! small collections fall back to a plain [`super::jobs::DumpShardJob`]
//! per shard. Because batch numbers are claimed from one shared atomic
//! counter, the order batches land in the output file is not guaranteed to
//! match the order the server produced them in -- acceptable for a dump,
//! whose files are unordered document sets (unlike restore, where send
//! order is load-bearing).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::instrument;

use crate::channel::{BoundedChannel, BoundedChannelProducerGuard};
use crate::http::{ConnectionOptions, ManagedClient};
use crate::masking::Masking;
use crate::stats::Stats;
use crate::workers::Job;

use super::cursor::{create_dump_context, delete_dump_context, receive_next_batch, DumpBatch, DumpContext};
use super::error::DumpError;
use super::file_provider::DumpFileProvider;
use super::shards::ShardTarget;

/// A dump job that internally fans out across `W` network threads and `R`
/// writer threads instead of running on the single client handed to it by
/// the outer [`crate::workers::ClientTaskQueue`].
///
/// Dispatched once per DBserver: `shards` lists every shard that server
/// leads (possibly spanning several collections), drained one at a time so
/// the W/R thread pools below are reused across the whole assignment rather
/// than rebuilt per shard.
pub struct ParallelDumpServer {
    shards: Vec<ShardTarget>,
    connection_options: ConnectionOptions,
    network_threads: usize,
    writer_threads: usize,
    prefetch_capacity: usize,
    context_ttl_seconds: u64,
    file_provider: Arc<DumpFileProvider>,
    masking: Arc<dyn Masking>,
    stats: Arc<Stats>,
}

impl ParallelDumpServer {
    /// Builds a parallel dump job for every shard in `shards`, all served by
    /// the single DBserver reachable through `connection_options`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        shards: Vec<ShardTarget>,
        connection_options: ConnectionOptions,
        network_threads: usize,
        writer_threads: usize,
        prefetch_capacity: usize,
        context_ttl_seconds: u64,
        file_provider: Arc<DumpFileProvider>,
        masking: Arc<dyn Masking>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            shards,
            connection_options,
            network_threads: network_threads.max(1),
            writer_threads: writer_threads.max(1),
            prefetch_capacity: prefetch_capacity.max(1),
            context_ttl_seconds,
            file_provider,
            masking,
            stats,
        }
    }

    #[instrument(skip(self, context_client), fields(shard_count = self.shards.len()))]
    fn run_inner(&self, context_client: &ManagedClient) -> Result<(), DumpError> {
        for target in &self.shards {
            let context = create_dump_context(
                context_client,
                &target.collection,
                Some(target.shard_id.as_str()),
                self.context_ttl_seconds,
            )?;
            let result = self.drain_context(&context, &target.collection);
            let _ = delete_dump_context(context_client, &context);
            result?;
        }
        Ok(())
    }

    fn drain_context(&self, context: &DumpContext, collection: &str) -> Result<(), DumpError> {
        let channel: Arc<BoundedChannel<DumpBatch>> = Arc::new(BoundedChannel::new(self.prefetch_capacity));
        let batch_counter = Arc::new(AtomicU64::new(0));
        let done = Arc::new(AtomicBool::new(false));
        let first_error: Arc<std::sync::Mutex<Option<DumpError>>> = Arc::new(std::sync::Mutex::new(None));

        let network_handles: Vec<_> = (0..self.network_threads)
            .map(|_| {
                let channel = Arc::clone(&channel);
                let batch_counter = Arc::clone(&batch_counter);
                let done = Arc::clone(&done);
                let first_error = Arc::clone(&first_error);
                let connection_options = self.connection_options.clone();
                let context = context.clone();
                thread::spawn(move || {
                    let guard = BoundedChannelProducerGuard::new(&channel);
                    let client = match ManagedClient::connect(connection_options) {
                        Ok(client) => client,
                        Err(e) => {
                            first_error.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get_or_insert(e.into());
                            done.store(true, Ordering::Release);
                            drop(guard);
                            return;
                        }
                    };
                    loop {
                        if done.load(Ordering::Acquire) {
                            break;
                        }
                        let batch_number = batch_counter.fetch_add(1, Ordering::SeqCst);
                        let last_acked = batch_number.saturating_sub(1);
                        match receive_next_batch(&client, &context, batch_number, last_acked) {
                            Ok(batch) => {
                                let more = batch.more;
                                channel.push(batch);
                                if !more {
                                    done.store(true, Ordering::Release);
                                    break;
                                }
                            }
                            Err(e) => {
                                first_error.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get_or_insert(e);
                                done.store(true, Ordering::Release);
                                break;
                            }
                        }
                    }
                    drop(guard);
                })
            })
            .collect();

        let writer_handles: Vec<_> = (0..self.writer_threads)
            .map(|_| {
                let channel = Arc::clone(&channel);
                let collection = collection.to_string();
                let file_provider = Arc::clone(&self.file_provider);
                let masking = Arc::clone(&self.masking);
                let stats = Arc::clone(&self.stats);
                let first_error = Arc::clone(&first_error);
                thread::spawn(move || {
                    loop {
                        let outcome = channel.pop();
                        let Some(batch) = outcome.item else { break };
                        if batch.payload.is_empty() {
                            continue;
                        }
                        if let Err(e) = super::jobs::write_batch(
                            &collection,
                            &batch.payload,
                            &file_provider,
                            masking.as_ref(),
                            &stats,
                        ) {
                            first_error.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get_or_insert(e);
                        }
                    }
                })
            })
            .collect();

        for handle in network_handles {
            let _ = handle.join();
        }
        for handle in writer_handles {
            let _ = handle.join();
        }

        let error = first_error.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Job for ParallelDumpServer {
    fn run(&self, client: &mut ManagedClient) -> Result<(), String> {
        self.run_inner(client).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Compressed, EncryptionScheme, ManagedDirectory};
    use crate::masking::NoOpMasking;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn connection_options(base_url: String) -> ConnectionOptions {
        ConnectionOptions {
            base_url,
            database: "_system".into(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(5),
            force: false,
        }
    }

    /// Serves `total_batches` distinct single-record batches (claimed by
    /// whichever network thread's atomic fetch_add lands on that number
    /// first), the last one flagged `more=false`.
    async fn mount_batches(server: &MockServer, total_batches: u64) {
        Mock::given(method("GET"))
            .and(path("/_db/_system/_api/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "3.11.0"})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_db/_system/_api/replication/dump-batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "ctx1", "ttl": 300})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_db/_system/_api/replication/dump-next/ctx1"))
            .respond_with(move |request: &Request| {
                let batch: u64 = request
                    .url
                    .query_pairs()
                    .find(|(k, _)| k == "batch")
                    .and_then(|(_, v)| v.parse().ok())
                    .unwrap_or(0);
                let more = batch + 1 < total_batches;
                let body = if batch < total_batches { format!("{{\"_key\":\"b{batch}\"}}\n") } else { String::new() };
                ResponseTemplate::new(200)
                    .insert_header("x-arango-replication-checkmore", if more { "true" } else { "false" })
                    .set_body_bytes(body.into_bytes())
            })
            .mount(server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/_db/_system/_api/replication/dump-batch/ctx1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[test]
    fn fans_out_across_network_and_writer_threads_without_dropping_batches() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(mount_batches(&server, 20));

        let tmp = tempfile::tempdir().unwrap();
        let directory = ManagedDirectory::create(tmp.path(), EncryptionScheme::None, false).unwrap();
        let file_provider = Arc::new(DumpFileProvider::new(directory, false, u64::MAX, false));
        let stats = Arc::new(Stats::new());

        let job = ParallelDumpServer::new(
            vec![ShardTarget { collection: "c1".to_string(), shard_id: "s01".to_string() }],
            connection_options(server.uri()),
            4,
            3,
            5,
            300,
            Arc::clone(&file_provider),
            Arc::new(NoOpMasking),
            Arc::clone(&stats),
        );
        let mut client = ManagedClient::connect(connection_options(server.uri())).unwrap();
        job.run(&mut client).unwrap();
        drop(job);

        let provider = Arc::try_unwrap(file_provider).unwrap_or_else(|_| panic!("provider still shared"));
        provider.finish().unwrap();

        let reopened = ManagedDirectory::open_existing(tmp.path(), None).unwrap();
        let data = reopened.slurp_file("c1.data.json", Compressed::Plain).unwrap();
        let mut keys: Vec<&str> = std::str::from_utf8(&data)
            .unwrap()
            .lines()
            .map(|line| line.trim_start_matches("{\"_key\":\"").trim_end_matches("\"}"))
            .collect();
        keys.sort_unstable();
        let expected: Vec<String> = (0..20).map(|i| format!("b{i}")).collect();
        assert_eq!(keys, expected);
        assert_eq!(stats.documents_transferred(), 20);
    }
}
