//! Single-collection and single-shard dump jobs.
//!
//! Both run the same cursor protocol (create context, pull batches,
//! delete context); they differ only in whether a shard id narrows the
//! context to one shard of a sharded collection.

use std::sync::Arc;

use crate::http::ManagedClient;
use crate::masking::Masking;
use crate::stats::Stats;
use crate::workers::Job;

use super::cursor::{create_dump_context, delete_dump_context, receive_next_batch};
use super::error::DumpError;
use super::file_provider::DumpFileProvider;

fn run_cursor_job(
    client: &ManagedClient,
    collection: &str,
    shard_id: Option<&str>,
    context_ttl_seconds: u64,
    file_provider: &DumpFileProvider,
    masking: &dyn Masking,
    stats: &Stats,
) -> Result<(), DumpError> {
    let context = create_dump_context(client, collection, shard_id, context_ttl_seconds)?;
    let result = pull_all_batches(client, collection, &context, context_ttl_seconds, file_provider, masking, stats);
    // Best-effort teardown: a failed delete must not mask the real error.
    let _ = delete_dump_context(client, &context);
    result
}

#[allow(clippy::too_many_arguments)]
fn pull_all_batches(
    client: &ManagedClient,
    collection: &str,
    context: &super::cursor::DumpContext,
    _context_ttl_seconds: u64,
    file_provider: &DumpFileProvider,
    masking: &dyn Masking,
    stats: &Stats,
) -> Result<(), DumpError> {
    let mut batch_number = 0u64;
    let mut last_acked = 0u64;
    loop {
        let batch = receive_next_batch(client, context, batch_number, last_acked)?;
        if !batch.payload.is_empty() {
            write_batch(collection, &batch.payload, file_provider, masking, stats)?;
        }
        last_acked = batch_number;
        batch_number += 1;
        if !batch.more {
            return Ok(());
        }
    }
}

pub(super) fn write_batch(
    collection: &str,
    payload: &[u8],
    file_provider: &DumpFileProvider,
    masking: &dyn Masking,
    stats: &Stats,
) -> Result<(), DumpError> {
    let mut documents = 0u64;
    for line in payload.split(|&b| b == b'\n').filter(|line| !line.is_empty()) {
        let value: serde_json::Value = serde_json::from_slice(line).map_err(|e| DumpError::MalformedBatch {
            collection: collection.to_string(),
            reason: e.to_string(),
        })?;
        let masked = masking.apply(collection, value);
        let bytes = serde_json::to_vec(&masked).expect("serde_json::Value always serializes");
        file_provider.append_record(collection, &bytes)?;
        documents += 1;
    }
    #[allow(clippy::cast_possible_truncation)]
    stats.record_batch(payload.len() as u64, documents);
    Ok(())
}

/// Streams one entire collection (single-server mode) to its data file.
pub struct DumpCollectionJob {
    collection: String,
    context_ttl_seconds: u64,
    file_provider: Arc<DumpFileProvider>,
    masking: Arc<dyn Masking>,
    stats: Arc<Stats>,
}

impl DumpCollectionJob {
    /// Builds a job for `collection`, writing through `file_provider` and
    /// running every document through `masking` first.
    #[must_use]
    pub fn new(
        collection: impl Into<String>,
        context_ttl_seconds: u64,
        file_provider: Arc<DumpFileProvider>,
        masking: Arc<dyn Masking>,
        stats: Arc<Stats>,
    ) -> Self {
        Self { collection: collection.into(), context_ttl_seconds, file_provider, masking, stats }
    }
}

impl Job for DumpCollectionJob {
    fn run(&self, client: &mut ManagedClient) -> Result<(), String> {
        run_cursor_job(
            client,
            &self.collection,
            None,
            self.context_ttl_seconds,
            &self.file_provider,
            self.masking.as_ref(),
            &self.stats,
        )
        .map_err(|e| e.to_string())
    }
}

/// Streams one shard of one collection (cluster mode, low-throughput path
/// used when a dedicated [`super::parallel_server::ParallelDumpServer`] is
/// not warranted).
pub struct DumpShardJob {
    collection: String,
    shard_id: String,
    context_ttl_seconds: u64,
    file_provider: Arc<DumpFileProvider>,
    masking: Arc<dyn Masking>,
    stats: Arc<Stats>,
}

impl DumpShardJob {
    /// Builds a job for one `shard_id` of `collection`.
    #[must_use]
    pub fn new(
        collection: impl Into<String>,
        shard_id: impl Into<String>,
        context_ttl_seconds: u64,
        file_provider: Arc<DumpFileProvider>,
        masking: Arc<dyn Masking>,
        stats: Arc<Stats>,
    ) -> Self {
        Self { collection: collection.into(), shard_id: shard_id.into(), context_ttl_seconds, file_provider, masking, stats }
    }
}

impl Job for DumpShardJob {
    fn run(&self, client: &mut ManagedClient) -> Result<(), String> {
        run_cursor_job(
            client,
            &self.collection,
            Some(&self.shard_id),
            self.context_ttl_seconds,
            &self.file_provider,
            self.masking.as_ref(),
            &self.stats,
        )
        .map_err(|e| e.to_string())
    }
}
