//! [`RestoreMainJob`] drives one collection end-to-end (create, stream data,
//! restore indexes); [`RestoreSendJob`] is the sibling it dispatches onto
//! the shared worker queue for each data chunk that does not need to be
//! sent inline.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

use crate::http::ManagedClient;
use crate::progress::{BytesAcked, CollectionProgress, CollectionState, ProgressTracker};
use crate::stats::Stats;
use crate::workers::{ClientTaskQueue, Job};

use super::datastream::{discover_data_files, stream_collection_data};
use super::error::RestoreError;
use super::planning::PlannedRestoreCollection;
use super::protocol::{send_restore_collection, send_restore_data, send_restore_indexes};
use super::state::{BufferPool, SharedCollectionState};
use crate::directory::ManagedDirectory;

/// Runtime configuration shared by every collection's job, resolved once by
/// the engine before dispatch begins.
pub(super) struct RestoreRuntimeConfig {
    pub(super) create_collections: bool,
    pub(super) import_data: bool,
    pub(super) overwrite: bool,
    pub(super) force: bool,
    pub(super) ignore_distribute_shards_like_errors: bool,
    pub(super) cluster_mode: bool,
    pub(super) default_number_of_shards: u64,
    pub(super) default_replication_factor: u64,
    pub(super) chunk_size: u64,
}

fn finish_chunk_and_update_progress(
    shared: &SharedCollectionState,
    progress: &ProgressTracker,
    collection: &str,
    file_no: u32,
    offset: u64,
) -> Result<(), RestoreError> {
    let watermark = shared.complete_chunk(file_no, offset);
    let state = if shared.is_fully_restored() { CollectionState::Restored } else { CollectionState::Restoring };
    progress.update_status(collection, CollectionProgress { state, bytes_acked: watermark })?;
    Ok(())
}

/// Drives one collection's restore: optionally creates it, streams its data
/// files in newline-cut chunks (dispatching most through the shared worker
/// queue as [`RestoreSendJob`]s), waits for every chunk to be acknowledged,
/// then restores its indexes.
pub(super) struct RestoreMainJob {
    collection: PlannedRestoreCollection,
    runtime: Arc<RestoreRuntimeConfig>,
    directory: Arc<ManagedDirectory>,
    send_queue: Arc<ClientTaskQueue>,
    progress: Arc<ProgressTracker>,
    buffer_pool: Arc<BufferPool>,
    stats: Arc<Stats>,
}

impl RestoreMainJob {
    #[must_use]
    pub(super) fn new(
        collection: PlannedRestoreCollection,
        runtime: Arc<RestoreRuntimeConfig>,
        directory: Arc<ManagedDirectory>,
        send_queue: Arc<ClientTaskQueue>,
        progress: Arc<ProgressTracker>,
        buffer_pool: Arc<BufferPool>,
        stats: Arc<Stats>,
    ) -> Self {
        Self { collection, runtime, directory, send_queue, progress, buffer_pool, stats }
    }

    fn run_inner(&self, client: &ManagedClient) -> Result<(), RestoreError> {
        let name = self.collection.name.clone();
        let existing = self.progress.get_status(&name);
        if existing.state == CollectionState::Restored {
            return Ok(());
        }

        if self.runtime.create_collections {
            match send_restore_collection(
                client,
                &self.collection.structure,
                self.runtime.overwrite,
                self.runtime.force,
                self.runtime.ignore_distribute_shards_like_errors,
                self.runtime.cluster_mode,
                self.runtime.default_number_of_shards,
                self.runtime.default_replication_factor,
            ) {
                Ok(()) => {
                    self.progress.update_status(
                        &name,
                        CollectionProgress { state: CollectionState::Created, bytes_acked: existing.bytes_acked },
                    )?;
                }
                Err(e) => {
                    if self.runtime.force {
                        warn!(collection = %name, error = %e, "collection creation failed, skipping due to force");
                        return Ok(());
                    }
                    return Err(RestoreError::CollectionCreateFailed { collection: name, reason: e.to_string() });
                }
            }
        }

        if self.runtime.import_data {
            if let Err(e) = self.stream_and_send(client, &name, existing.bytes_acked) {
                if self.runtime.force {
                    warn!(collection = %name, error = %e, "data import failed, skipping due to force");
                    return Ok(());
                }
                return Err(e);
            }
        }

        if self.runtime.create_collections {
            let has_indexes =
                self.collection.structure.get("indexes").and_then(Value::as_array).is_some_and(|a| !a.is_empty());
            if has_indexes {
                if let Err(e) = send_restore_indexes(client, &self.collection.structure, self.runtime.force) {
                    if self.runtime.force {
                        warn!(collection = %name, error = %e, "index restore failed, continuing due to force");
                        return Ok(());
                    }
                    return Err(RestoreError::IndexRestoreFailed { collection: name, reason: e.to_string() });
                }
            }
        }

        Ok(())
    }

    fn stream_and_send(&self, client: &ManagedClient, name: &str, resume_from: BytesAcked) -> Result<(), RestoreError> {
        let Some((handle, file_numbers)) = discover_data_files(&self.directory, name)? else {
            // No data file at all: an empty collection. Nothing to stream.
            return Ok(());
        };

        let start_file_index = file_numbers.iter().position(|&n| n >= resume_from.file_no).unwrap_or(0);
        let start_offset = if file_numbers.get(start_file_index) == Some(&resume_from.file_no) {
            resume_from.read_offset
        } else {
            0
        };

        let shared = Arc::new(SharedCollectionState::new());
        let chunk_size = self.runtime.chunk_size.max(1) as usize;

        let result = stream_collection_data(
            &self.directory,
            name,
            handle,
            &file_numbers,
            start_file_index,
            start_offset,
            chunk_size,
            &self.buffer_pool,
            |file_no, offset, chunk, is_final| {
                shared.begin_chunk(file_no, offset, chunk.len() as u64);
                if is_final {
                    self.send_inline(client, name, &shared, file_no, offset, chunk)
                } else {
                    self.dispatch_sibling(name, &shared, file_no, offset, chunk)
                }
            },
        );

        shared.mark_read_complete();
        result?;

        if let Some(reason) = shared.wait_for_drain() {
            return Err(RestoreError::DataSendFailed { collection: name.to_string(), reason });
        }
        Ok(())
    }

    fn send_inline(
        &self,
        client: &ManagedClient,
        name: &str,
        shared: &SharedCollectionState,
        file_no: u32,
        offset: u64,
        chunk: Vec<u8>,
    ) -> Result<(), RestoreError> {
        let documents = chunk.iter().filter(|&&b| b == b'\n').count() as u64;
        let bytes = chunk.len() as u64;
        match send_restore_data(client, name, &chunk, self.runtime.force) {
            Ok(()) => {
                self.stats.record_batch(bytes, documents);
                finish_chunk_and_update_progress(shared, &self.progress, name, file_no, offset)?;
                self.buffer_pool.return_buffer(chunk);
                Ok(())
            }
            Err(e) => {
                shared.record_error(e.to_string());
                self.buffer_pool.return_buffer(chunk);
                if self.runtime.force { Ok(()) } else { Err(e) }
            }
        }
    }

    fn dispatch_sibling(
        &self,
        name: &str,
        shared: &Arc<SharedCollectionState>,
        file_no: u32,
        offset: u64,
        chunk: Vec<u8>,
    ) -> Result<(), RestoreError> {
        let job = RestoreSendJob {
            collection: name.to_string(),
            file_no,
            offset,
            chunk: Mutex::new(chunk),
            force: self.runtime.force,
            shared: Arc::clone(shared),
            progress: Arc::clone(&self.progress),
            buffer_pool: Arc::clone(&self.buffer_pool),
            stats: Arc::clone(&self.stats),
        };
        self.send_queue.queue_job(Box::new(job)).map_err(RestoreError::from)
    }
}

impl Job for RestoreMainJob {
    fn run(&self, client: &mut ManagedClient) -> Result<(), String> {
        self.run_inner(client).map_err(|e| e.to_string())
    }
}

/// Sends one already-cut data chunk via `restore-data`, on a worker other
/// than the one running the chunk's [`RestoreMainJob`].
struct RestoreSendJob {
    collection: String,
    file_no: u32,
    offset: u64,
    chunk: Mutex<Vec<u8>>,
    force: bool,
    shared: Arc<SharedCollectionState>,
    progress: Arc<ProgressTracker>,
    buffer_pool: Arc<BufferPool>,
    stats: Arc<Stats>,
}

impl RestoreSendJob {
    fn run_inner(&self, client: &ManagedClient) -> Result<(), RestoreError> {
        let chunk = std::mem::take(&mut *self.chunk.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
        let documents = chunk.iter().filter(|&&b| b == b'\n').count() as u64;
        let bytes = chunk.len() as u64;
        let result = send_restore_data(client, &self.collection, &chunk, self.force);
        self.buffer_pool.return_buffer(chunk);
        match result {
            Ok(()) => {
                self.stats.record_batch(bytes, documents);
                finish_chunk_and_update_progress(&self.shared, &self.progress, &self.collection, self.file_no, self.offset)
            }
            Err(e) => {
                self.shared.record_error(e.to_string());
                if self.force { Ok(()) } else { Err(e) }
            }
        }
    }
}

impl Job for RestoreSendJob {
    fn run(&self, client: &mut ManagedClient) -> Result<(), String> {
        self.run_inner(client).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{EncryptionScheme, ManagedDirectory};
    use crate::http::ConnectionOptions;
    use crate::progress::ProgressTracker;
    use std::io::Write as _;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connect(server: &MockServer) -> (ManagedClient, tokio::runtime::Runtime) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            Mock::given(method("GET"))
                .and(path("/_db/testdb/_api/version"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "3.11.0"})))
                .mount(server)
                .await;
        });
        let options = ConnectionOptions {
            base_url: server.uri(),
            database: "testdb".into(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(5),
            force: false,
        };
        let client = ManagedClient::connect(options).unwrap();
        (client, rt)
    }

    fn runtime_config(force: bool, import_data: bool, create_collections: bool) -> Arc<RestoreRuntimeConfig> {
        Arc::new(RestoreRuntimeConfig {
            create_collections,
            import_data,
            overwrite: true,
            force,
            ignore_distribute_shards_like_errors: false,
            cluster_mode: false,
            default_number_of_shards: 1,
            default_replication_factor: 1,
            chunk_size: 65536,
        })
    }

    fn collection(name: &str) -> PlannedRestoreCollection {
        PlannedRestoreCollection {
            name: name.to_string(),
            structure: serde_json::json!({"parameters": {"name": name}, "indexes": []}),
        }
    }

    fn job_deps(directory: ManagedDirectory) -> (Arc<ManagedDirectory>, Arc<ProgressTracker>, Arc<BufferPool>, Arc<Stats>) {
        let directory = Arc::new(directory);
        let progress = Arc::new(ProgressTracker::new(ManagedDirectory::open_existing(directory.path(), None).unwrap(), false).unwrap());
        (directory, progress, Arc::new(BufferPool::new()), Arc::new(Stats::new()))
    }

    fn dummy_send_queue(server: &MockServer) -> Arc<ClientTaskQueue> {
        let options = ConnectionOptions {
            base_url: server.uri(),
            database: "testdb".into(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(5),
            force: false,
        };
        Arc::new(ClientTaskQueue::spawn_workers(1, 4, &options, Arc::new(Stats::new())).unwrap())
    }

    #[test]
    fn force_mode_skips_a_failed_collection_create_without_erroring() {
        let server_rt = tokio::runtime::Runtime::new().unwrap();
        let server = server_rt.block_on(MockServer::start());
        let (client, rt) = connect(&server);
        rt.block_on(async {
            Mock::given(method("PUT"))
                .and(path("/_db/testdb/_api/replication/restore-collection"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;
        });

        let tmp = tempfile::tempdir().unwrap();
        let directory = ManagedDirectory::create(tmp.path(), EncryptionScheme::None, false).unwrap();
        let (directory, progress, buffer_pool, stats) = job_deps(directory);
        let send_queue = dummy_send_queue(&server);

        let job = RestoreMainJob::new(
            collection("c1"),
            runtime_config(true, false, true),
            directory,
            send_queue,
            progress,
            buffer_pool,
            stats,
        );
        job.run_inner(&client).expect("force mode should swallow the create failure");
    }

    #[test]
    fn non_force_mode_propagates_a_failed_collection_create() {
        let server_rt = tokio::runtime::Runtime::new().unwrap();
        let server = server_rt.block_on(MockServer::start());
        let (client, rt) = connect(&server);
        rt.block_on(async {
            Mock::given(method("PUT"))
                .and(path("/_db/testdb/_api/replication/restore-collection"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;
        });

        let tmp = tempfile::tempdir().unwrap();
        let directory = ManagedDirectory::create(tmp.path(), EncryptionScheme::None, false).unwrap();
        let (directory, progress, buffer_pool, stats) = job_deps(directory);
        let send_queue = dummy_send_queue(&server);

        let job = RestoreMainJob::new(
            collection("c1"),
            runtime_config(false, false, true),
            directory,
            send_queue,
            progress,
            buffer_pool,
            stats,
        );
        let err = job.run_inner(&client).unwrap_err();
        assert!(matches!(err, RestoreError::CollectionCreateFailed { .. }));
    }

    #[test]
    fn a_collection_already_marked_restored_is_skipped_entirely() {
        let server_rt = tokio::runtime::Runtime::new().unwrap();
        let server = server_rt.block_on(MockServer::start());
        let (client, _rt) = connect(&server);
        // No restore-collection mock mounted: if the job tried to create the
        // collection anyway this would fail with a connection/match error.

        let tmp = tempfile::tempdir().unwrap();
        let directory = ManagedDirectory::create(tmp.path(), EncryptionScheme::None, false).unwrap();
        let (directory, progress, buffer_pool, stats) = job_deps(directory);
        progress
            .update_status(
                "c1",
                CollectionProgress { state: CollectionState::Restored, bytes_acked: BytesAcked::default() },
            )
            .unwrap();
        let send_queue = dummy_send_queue(&server);

        let job = RestoreMainJob::new(
            collection("c1"),
            runtime_config(false, true, true),
            directory,
            send_queue,
            progress,
            buffer_pool,
            stats,
        );
        job.run_inner(&client).unwrap();
    }

    #[test]
    fn streaming_a_collections_data_marks_it_restored_with_a_correct_watermark() {
        let server_rt = tokio::runtime::Runtime::new().unwrap();
        let server = server_rt.block_on(MockServer::start());
        let (client, rt) = connect(&server);
        rt.block_on(async {
            Mock::given(method("PUT"))
                .and(path("/_db/testdb/_api/replication/restore-data"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;
        });

        let tmp = tempfile::tempdir().unwrap();
        let directory = ManagedDirectory::create(tmp.path(), EncryptionScheme::None, false).unwrap();
        {
            let mut file = directory.writable_file("c1.data.json", crate::directory::Compressed::Plain, true).unwrap();
            file.write_all(b"{\"_key\":\"a\"}\n{\"_key\":\"b\"}\n").unwrap();
            file.close().unwrap();
        }
        let (directory, progress, buffer_pool, stats) = job_deps(directory);
        let send_queue = dummy_send_queue(&server);

        let job = RestoreMainJob::new(
            collection("c1"),
            runtime_config(false, true, false),
            directory,
            Arc::clone(&send_queue),
            Arc::clone(&progress),
            buffer_pool,
            Arc::clone(&stats),
        );
        job.run_inner(&client).unwrap();
        send_queue.wait_for_idle();

        let status = progress.get_status("c1");
        assert_eq!(status.state, CollectionState::Restored);
        assert_eq!(status.bytes_acked, BytesAcked { file_no: 0, read_offset: 26 });
        assert_eq!(stats.documents_transferred(), 2);
    }
}
