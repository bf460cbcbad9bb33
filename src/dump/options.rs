//! Validated dump configuration handed to [`super::run_dump`].

use std::path::PathBuf;
use std::time::Duration;

use crate::directory::EncryptionScheme;
use crate::http::ConnectionOptions;

/// Fully validated parameters for one dump run. Built and validated by the
/// caller (typically the `dumpkit-dump` CLI binary); the core never parses
/// command-line arguments itself.
pub struct DumpOptions {
    /// Target server and database to dump from.
    pub connection: ConnectionOptions,
    /// Directory to write the dump into.
    pub output_directory: PathBuf,
    /// Overwrite an existing, non-empty output directory.
    pub overwrite: bool,
    /// Include `_`-prefixed system collections.
    pub include_system_collections: bool,
    /// If non-empty, dump only these collections.
    pub collections: Vec<String>,
    /// Collections to skip even if otherwise selected.
    pub excluded_collections: Vec<String>,
    /// Also dump each collection's view definition, if any.
    pub dump_views: bool,
    /// Network threads per DBserver in cluster mode (`W`).
    pub dbserver_worker_threads: usize,
    /// Writer threads per DBserver in cluster mode (`R`).
    pub local_writer_threads: usize,
    /// Bounded channel capacity between network and writer threads.
    pub dbserver_prefetch_batches: usize,
    /// Collection-level parallelism in single-server mode.
    pub collection_threads: usize,
    /// Split collection data files once a part exceeds this many bytes.
    pub split_files: bool,
    /// Byte ceiling per split part (ignored when `split_files` is false).
    pub max_file_size_bytes: u64,
    /// Gzip-compress every content file.
    pub compress: bool,
    /// Encryption applied to the output directory.
    pub encryption: EncryptionScheme,
    /// TTL requested for each dump context.
    pub context_ttl: Duration,
}
