//! Restore planning and execution: connect, optionally create the target
//! database, enumerate collections into dependency waves, and dispatch one
//! [`RestoreMainJob`] per collection per wave.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::directory::{Compressed, ManagedDirectory};
use crate::http::{ClientError, ClusterRole, ManagedClient};
use crate::progress::ProgressTracker;
use crate::stats::Stats;
use crate::workers::ClientTaskQueue;
use crate::CoreError;

use super::error::RestoreError;
use super::jobs::{RestoreMainJob, RestoreRuntimeConfig};
use super::options::RestoreOptions;
use super::planning::discover_collections;
use super::protocol::try_create_database;
use super::state::BufferPool;

const QUEUE_CAPACITY_PER_WORKER: usize = 4;
const SYSTEM_DATABASE: &str = "_system";

#[derive(Deserialize)]
struct RestoreManifest {
    database: String,
}

/// Runs a full restore according to `options`, returning the stats counters
/// accumulated along the way.
///
/// With `options.all_databases` set, `options.input_directory` is treated
/// as a directory of per-database dump directories (each containing its
/// own `dump.json`) rather than a single dump; every one found is restored
/// in turn, sharing one counter.
///
/// # Errors
///
/// Returns [`CoreError`] if planning fails (cannot connect, cannot open the
/// input directory, a structure file is malformed) or if any collection's
/// job fails; in the latter case the first observed error is returned
/// after every other in-flight job for that database has completed.
#[instrument(skip(options))]
pub fn run_restore(options: RestoreOptions) -> Result<Arc<Stats>, CoreError> {
    let stats = Arc::new(Stats::new());
    if options.all_databases {
        run_all_databases(&options, &stats)?;
    } else {
        run_single_database(&options, &options.input_directory, &options.connection.database, &stats)?;
    }
    Ok(stats)
}

fn run_all_databases(options: &RestoreOptions, stats: &Arc<Stats>) -> Result<(), CoreError> {
    let entries = fs::read_dir(&options.input_directory)
        .map_err(|e| crate::directory::DirectoryError::io(&options.input_directory, e))
        .map_err(RestoreError::from)?;

    let mut found_any = false;
    for entry in entries {
        let entry = entry
            .map_err(|e| crate::directory::DirectoryError::io(&options.input_directory, e))
            .map_err(RestoreError::from)?;
        let path = entry.path();
        if !path.is_dir() || !path.join("dump.json").exists() {
            continue;
        }
        found_any = true;
        let database = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        run_single_database(options, &path, &database, stats)?;
    }
    if !found_any {
        warn!(directory = %options.input_directory.display(), "no per-database subdirectories found");
    }
    Ok(())
}

fn connect_or_create_database(options: &RestoreOptions, database: &str) -> Result<ManagedClient, CoreError> {
    let connection = options.connection_for_database(database.to_string());
    match ManagedClient::connect_with_retries(connection.clone(), options.initial_connect_retries) {
        Ok(client) => Ok(client),
        Err(ClientError::DatabaseNotFound(name)) => {
            if !options.create_database {
                return Err(RestoreError::DatabaseCreateFailed(name).into());
            }
            let system_client = ManagedClient::connect_with_retries(
                options.connection_for_database(SYSTEM_DATABASE.to_string()),
                options.initial_connect_retries,
            )
            .map_err(RestoreError::from)?;
            try_create_database(
                &system_client,
                &name,
                connection.username.as_deref(),
                connection.password.as_deref(),
            )
            .map_err(|_| RestoreError::DatabaseCreateFailed(name.clone()))?;
            Ok(ManagedClient::connect(connection).map_err(RestoreError::from)?)
        }
        Err(other) => Err(RestoreError::from(other).into()),
    }
}

fn run_single_database(
    options: &RestoreOptions,
    input_directory: &Path,
    database: &str,
    stats: &Arc<Stats>,
) -> Result<(), CoreError> {
    let planning_client = connect_or_create_database(options, database)?;
    let cluster_role = planning_client.get_arango_is_cluster().map_err(RestoreError::from)?;
    let cluster_mode = matches!(cluster_role, ClusterRole::Coordinator);
    info!(database = %database, ?cluster_role, "starting restore");

    let directory = ManagedDirectory::open_existing(input_directory, options.encryption_key).map_err(RestoreError::from)?;

    let manifest: RestoreManifest =
        directory.value_from_json_file("dump.json", Compressed::Plain).map_err(RestoreError::from)?;
    if options.force_same_database && manifest.database != database {
        return Err(
            RestoreError::DatabaseNameMismatch { dumped: manifest.database, target: database.to_string() }.into()
        );
    }

    let progress_directory =
        ManagedDirectory::open_existing(input_directory, options.encryption_key).map_err(RestoreError::from)?;
    let progress =
        Arc::new(ProgressTracker::new(progress_directory, options.ignore_existing_progress).map_err(RestoreError::from)?);

    let directory = Arc::new(directory);
    let waves = discover_collections(&directory, options).map_err(RestoreError::from)?;

    let runtime = Arc::new(RestoreRuntimeConfig {
        create_collections: options.create_collections,
        import_data: options.import_data,
        overwrite: options.overwrite,
        force: options.force,
        ignore_distribute_shards_like_errors: options.ignore_distribute_shards_like_errors,
        cluster_mode,
        default_number_of_shards: options.default_number_of_shards,
        default_replication_factor: options.default_replication_factor,
        chunk_size: options.chunk_size,
    });
    let buffer_pool = Arc::new(BufferPool::new());

    // RestoreMainJob and RestoreSendJob must never share a pool: a main job
    // blocks in `wait_for_drain` waiting for its siblings to finish, and a
    // sibling queued onto the same pool the main job occupies can never be
    // picked up once every worker is parked that way. Splitting `worker_count`
    // across two independent queues keeps a send worker always free.
    let worker_count = options.worker_threads.max(1);
    let main_worker_count = worker_count.div_ceil(2).max(1);
    let send_worker_count = worker_count.saturating_sub(main_worker_count).max(1);
    let connection = options.connection_for_database(database.to_string());
    let main_queue = Arc::new(
        ClientTaskQueue::spawn_workers(
            main_worker_count,
            main_worker_count * QUEUE_CAPACITY_PER_WORKER,
            &connection,
            Arc::clone(stats),
        )
        .map_err(RestoreError::from)?,
    );
    let send_queue = Arc::new(
        ClientTaskQueue::spawn_workers(
            send_worker_count,
            send_worker_count * QUEUE_CAPACITY_PER_WORKER,
            &connection,
            Arc::clone(stats),
        )
        .map_err(RestoreError::from)?,
    );

    for wave in waves {
        for collection in wave {
            let job = RestoreMainJob::new(
                collection,
                Arc::clone(&runtime),
                Arc::clone(&directory),
                Arc::clone(&send_queue),
                Arc::clone(&progress),
                Arc::clone(&buffer_pool),
                Arc::clone(stats),
            );
            main_queue.queue_job(Box::new(job)).map_err(RestoreError::from)?;
        }
        main_queue.wait_for_idle();
        send_queue.wait_for_idle();
    }

    let mut errors = main_queue.errors();
    errors.extend(send_queue.errors());
    for (pool, queue) in [("main", main_queue), ("send", send_queue)] {
        match Arc::try_unwrap(queue) {
            Ok(queue) => queue.shutdown(),
            Err(arc) => {
                warn!(pool, outstanding = Arc::strong_count(&arc), "worker queue outlived its restore jobs");
                return Err(RestoreError::TaskQueueStillShared(Arc::strong_count(&arc)).into());
            }
        }
    }

    crate::error::first_error_or_ok(&errors)
}
