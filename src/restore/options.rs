//! Validated restore configuration handed to [`super::run_restore`].

use std::path::PathBuf;

use crate::http::ConnectionOptions;

/// Fully validated parameters for one restore run. Built and validated by
/// the caller (typically the `dumpkit-restore` CLI binary); the core never
/// parses command-line arguments itself.
pub struct RestoreOptions {
    /// Target server and database to restore into.
    pub connection: ConnectionOptions,
    /// Directory a prior dump was written into.
    pub input_directory: PathBuf,
    /// If non-empty, restore only these collections.
    pub collections: Vec<String>,
    /// Include `_`-prefixed system collections.
    pub include_system_collections: bool,
    /// Send `restore-collection` for each selected collection before
    /// streaming its data.
    pub create_collections: bool,
    /// Stream each collection's data files through `restore-data`.
    pub import_data: bool,
    /// Allow `restore-collection` to overwrite an existing collection.
    pub overwrite: bool,
    /// Keep going past a per-collection failure instead of aborting the run.
    pub force: bool,
    /// Ignore `distributeShardsLike` targets that are missing from this dump.
    pub ignore_distribute_shards_like_errors: bool,
    /// `numberOfShards` sent when a cluster collection's structure omits it.
    pub default_number_of_shards: u64,
    /// `replicationFactor` sent when a collection's structure omits it.
    pub default_replication_factor: u64,
    /// Target size, in bytes, of each `restore-data` chunk (cut at the
    /// nearest preceding newline).
    pub chunk_size: u64,
    /// Create the target database first if it does not exist.
    pub create_database: bool,
    /// Refuse to restore into a database other than the one `dump.json`
    /// names.
    pub force_same_database: bool,
    /// Restore every per-database subdirectory of `input_directory` instead
    /// of treating it as a single dump.
    pub all_databases: bool,
    /// Discard any existing `continue.json` instead of resuming from it.
    pub ignore_existing_progress: bool,
    /// Worker threads running `RestoreMainJob`/`RestoreSendJob`s.
    pub worker_threads: usize,
    /// Decryption key for the input directory, if it was written encrypted.
    pub encryption_key: Option<[u8; 32]>,
    /// Extra attempts for the initial connect handshake only (0 means "try
    /// once, like every other HTTP call in the core"). In-flight data and
    /// index requests are never retried by the core.
    pub initial_connect_retries: u32,
}

impl RestoreOptions {
    pub(super) fn connection_for_database(&self, database: impl Into<String>) -> ConnectionOptions {
        ConnectionOptions { database: database.into(), ..self.connection.clone() }
    }
}
