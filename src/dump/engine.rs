//! Dump planning: enumerate collections, write structure/view files, and
//! dispatch one job (or one [`ParallelDumpServer`]) per collection.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::directory::{Compressed, EncryptionScheme, ManagedDirectory};
use crate::http::{ClusterRole, ManagedClient};
use crate::masking::{Masking, NoOpMasking};
use crate::stats::Stats;
use crate::workers::ClientTaskQueue;
use crate::CoreError;

use super::error::DumpError;
use super::file_provider::DumpFileProvider;
use super::jobs::{DumpCollectionJob, DumpShardJob};
use super::options::DumpOptions;
use super::parallel_server::ParallelDumpServer;
use super::shards::{fetch_shard_distribution, group_by_dbserver, DbServerAssignment};

const QUEUE_CAPACITY_PER_WORKER: usize = 4;

/// A document/edge collection selected for dumping, with just enough
/// metadata to plan the job and write the structure file.
struct PlannedCollection {
    name: String,
    properties: Value,
    indexes: Value,
}

#[derive(Serialize)]
struct DumpManifest {
    database: String,
    properties: Value,
}

#[derive(Serialize)]
struct StructureFile {
    parameters: Value,
    indexes: Value,
}

/// Runs a full dump according to `options`, returning the stats counters
/// accumulated along the way.
///
/// # Errors
///
/// Returns [`CoreError`] if planning fails (cannot connect, cannot list
/// collections, cannot create the output directory) or if any collection's
/// job fails; in the latter case the first observed error is returned
/// after every other in-flight job has completed.
#[instrument(skip(options))]
pub fn run_dump(options: DumpOptions) -> Result<Arc<Stats>, CoreError> {
    run_dump_with_masking(options, Arc::new(NoOpMasking))
}

/// Same as [`run_dump`], but with an explicit masking policy instead of the
/// default pass-through.
///
/// # Errors
///
/// See [`run_dump`].
pub fn run_dump_with_masking(options: DumpOptions, masking: Arc<dyn Masking>) -> Result<Arc<Stats>, CoreError> {
    let planning_client = ManagedClient::connect(options.connection.clone()).map_err(DumpError::from)?;
    let cluster_role = planning_client.get_arango_is_cluster().map_err(DumpError::from)?;
    let is_rocksdb = planning_client.get_arango_is_using_engine("rocksdb").map_err(DumpError::from)?;
    info!(database = %options.connection.database, ?cluster_role, is_rocksdb, "starting dump");

    let directory =
        ManagedDirectory::create(options.output_directory.clone(), options.encryption.clone(), options.overwrite)
            .map_err(DumpError::from)?;

    write_manifest(&planning_client, &options.connection.database, &directory)?;

    let planned = plan_collections(&planning_client, &options)?;
    if options.dump_views {
        write_view_files(&planning_client, &directory, &planned)?;
    }
    for collection in &planned {
        write_structure_file(&directory, collection)?;
    }

    let stats = Arc::new(Stats::new());
    let file_provider = Arc::new(DumpFileProvider::new(
        directory,
        options.split_files,
        options.max_file_size_bytes,
        options.compress,
    ));

    let worker_count = options.collection_threads.max(1);
    let queue = ClientTaskQueue::spawn_workers(
        worker_count,
        worker_count * QUEUE_CAPACITY_PER_WORKER,
        &options.connection,
        Arc::clone(&stats),
    )
    .map_err(DumpError::from)?;

    let is_cluster = matches!(cluster_role, ClusterRole::Coordinator);
    if is_cluster {
        let distributions = planned
            .iter()
            .map(|collection| {
                let distribution = fetch_shard_distribution(&planning_client, &collection.name)?;
                Ok((collection.name.clone(), distribution))
            })
            .collect::<Result<Vec<_>, DumpError>>()?;

        for (dbserver, assignment) in group_by_dbserver(distributions) {
            let job: Box<dyn crate::workers::Job> = match assignment {
                DbServerAssignment::Parallel(shards) => {
                    info!(dbserver, shards = shards.len(), "dispatching parallel dump server");
                    Box::new(ParallelDumpServer::new(
                        shards,
                        options.connection.clone(),
                        options.dbserver_worker_threads,
                        options.local_writer_threads,
                        options.dbserver_prefetch_batches,
                        options.context_ttl.as_secs(),
                        Arc::clone(&file_provider),
                        Arc::clone(&masking),
                        Arc::clone(&stats),
                    ))
                }
                DbServerAssignment::Individual(shards) => {
                    for shard in shards {
                        let job = DumpShardJob::new(
                            shard.collection,
                            shard.shard_id,
                            options.context_ttl.as_secs(),
                            Arc::clone(&file_provider),
                            Arc::clone(&masking),
                            Arc::clone(&stats),
                        );
                        queue.queue_job(Box::new(job)).map_err(DumpError::from)?;
                    }
                    continue;
                }
            };
            queue.queue_job(job).map_err(DumpError::from)?;
        }
    } else {
        for collection in &planned {
            let job = DumpCollectionJob::new(
                collection.name.clone(),
                options.context_ttl.as_secs(),
                Arc::clone(&file_provider),
                Arc::clone(&masking),
                Arc::clone(&stats),
            );
            queue.queue_job(Box::new(job)).map_err(DumpError::from)?;
        }
    }

    queue.wait_for_idle();
    let errors = queue.errors();
    queue.shutdown();

    match Arc::try_unwrap(file_provider) {
        Ok(provider) => provider.finish().map_err(DumpError::from)?,
        Err(arc) => {
            warn!(outstanding = Arc::strong_count(&arc), "file provider outlived its dump jobs");
            return Err(DumpError::FileProviderStillShared(Arc::strong_count(&arc)).into());
        }
    };

    crate::error::first_error_or_ok(&errors)?;
    Ok(stats)
}

#[instrument(skip(client, directory))]
fn write_manifest(client: &ManagedClient, database: &str, directory: &ManagedDirectory) -> Result<(), CoreError> {
    let url = client.rewrite_location("/_api/database/current");
    let response = client
        .authed(client.http().get(&url))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })
        .map_err(DumpError::from)?;
    let decoded: Value = crate::http::check_and_decode(response).map_err(DumpError::from)?;
    let properties = decoded.get("result").cloned().unwrap_or(decoded);
    let manifest = DumpManifest { database: database.to_string(), properties };
    directory
        .value_to_json_file("dump.json", &manifest, Compressed::Plain, true)
        .map_err(DumpError::from)?;
    Ok(())
}

fn plan_collections(client: &ManagedClient, options: &DumpOptions) -> Result<Vec<PlannedCollection>, CoreError> {
    let url = client.rewrite_location("/_api/collection");
    let response = client
        .authed(client.http().get(&url))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })
        .map_err(DumpError::from)?;
    let decoded: Value = crate::http::check_and_decode(response).map_err(DumpError::from)?;
    let listed = decoded.get("result").and_then(Value::as_array).cloned().unwrap_or_default();

    let mut planned = Vec::new();
    for entry in listed {
        let Some(name) = entry.get("name").and_then(Value::as_str) else { continue };
        let is_system = entry.get("isSystem").and_then(Value::as_bool).unwrap_or(false);
        if is_system && !options.include_system_collections {
            continue;
        }
        if !options.collections.is_empty() && !options.collections.iter().any(|c| c == name) {
            continue;
        }
        if options.excluded_collections.iter().any(|c| c == name) {
            continue;
        }
        let indexes = fetch_indexes(client, name)?;
        planned.push(PlannedCollection { name: name.to_string(), properties: entry, indexes });
    }
    Ok(planned)
}

fn fetch_indexes(client: &ManagedClient, collection: &str) -> Result<Value, CoreError> {
    let url = client.rewrite_location(&format!("/_api/index?collection={collection}"));
    let response = client
        .authed(client.http().get(&url))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })
        .map_err(DumpError::from)?;
    let decoded: Value = crate::http::check_and_decode(response).map_err(DumpError::from)?;
    Ok(decoded.get("indexes").cloned().unwrap_or_else(|| Value::Array(Vec::new())))
}

fn write_structure_file(directory: &ManagedDirectory, collection: &PlannedCollection) -> Result<(), CoreError> {
    let structure = StructureFile { parameters: collection.properties.clone(), indexes: collection.indexes.clone() };
    directory
        .value_to_json_file(&format!("{}.structure.json", collection.name), &structure, Compressed::Plain, true)
        .map_err(DumpError::from)?;
    Ok(())
}

fn write_view_files(
    client: &ManagedClient,
    directory: &ManagedDirectory,
    planned: &[PlannedCollection],
) -> Result<(), CoreError> {
    let url = client.rewrite_location("/_api/view");
    let response = client
        .authed(client.http().get(&url))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })
        .map_err(DumpError::from)?;
    let decoded: Value = crate::http::check_and_decode(response).map_err(DumpError::from)?;
    let views = decoded.get("result").and_then(Value::as_array).cloned().unwrap_or_default();

    for collection in planned {
        let matching = views.iter().find(|view| {
            view.get("links")
                .and_then(Value::as_object)
                .is_some_and(|links| links.contains_key(&collection.name))
        });
        if let Some(view) = matching {
            directory
                .value_to_json_file(&format!("{}.view.json", collection.name), view, Compressed::Plain, true)
                .map_err(DumpError::from)?;
        }
    }
    Ok(())
}
