//! CLI entry point for restoring a dump directory back into a database.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dumpkit_core::http::ConnectionOptions;
use dumpkit_core::restore::{RestoreOptions, run_restore};
use tracing::{error, info};

const KEYRING_SERVICE: &str = "dumpkit";
const PASSWORD_ENV_VAR: &str = "DUMPKIT_PASSWORD";

/// Restores collections, indexes, and data from a directory written by
/// `dumpkit-dump` back into a target database.
#[derive(Parser, Debug)]
#[command(name = "dumpkit-restore", version, about)]
struct Args {
    /// Server base URL, e.g. http://localhost:8529.
    #[arg(long)]
    server: String,

    /// Database to restore into.
    #[arg(long, default_value = "_system")]
    database: String,

    /// HTTP basic auth username.
    #[arg(long)]
    username: Option<String>,

    /// HTTP basic auth password. Falls back to `DUMPKIT_PASSWORD` if unset.
    #[arg(long)]
    password: Option<String>,

    /// Per-request timeout, in seconds.
    #[arg(long, default_value_t = 300)]
    request_timeout_secs: u64,

    /// Directory a prior `dumpkit-dump` run wrote (or, with
    /// `--all-databases`, a directory containing one such directory per
    /// database).
    #[arg(long)]
    input_directory: PathBuf,

    /// Restore only this collection; repeatable. Defaults to every
    /// collection found in the dump.
    #[arg(long = "collection")]
    collections: Vec<String>,

    /// Include `_`-prefixed system collections.
    #[arg(long)]
    include_system_collections: bool,

    /// Create each collection (and its indexes) before importing data.
    #[arg(long, default_value_t = true)]
    create_collections: bool,

    /// Import each collection's data.
    #[arg(long, default_value_t = true)]
    import_data: bool,

    /// Allow `restore-collection` to overwrite an existing collection.
    #[arg(long)]
    overwrite: bool,

    /// Downgrade per-collection failures (create, data, indexes) to logged
    /// warnings instead of aborting the whole run.
    #[arg(long)]
    force: bool,

    /// Ignore `distributeShardsLike` errors reported by the server.
    #[arg(long)]
    ignore_distribute_shards_like_errors: bool,

    /// Shard count requested for a collection whose structure file does not
    /// already specify one, in cluster mode.
    #[arg(long, default_value_t = 1)]
    default_number_of_shards: u64,

    /// Replication factor requested for a collection whose structure file
    /// does not already specify one, in cluster mode.
    #[arg(long, default_value_t = 1)]
    default_replication_factor: u64,

    /// Target size, in bytes, for each `restore-data` chunk cut at a
    /// newline boundary.
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    chunk_size: u64,

    /// Create the target database if it does not already exist.
    #[arg(long)]
    create_database: bool,

    /// Refuse to restore into a database other than the one `dump.json`
    /// was taken from.
    #[arg(long)]
    force_same_database: bool,

    /// Treat `input-directory` as a directory of per-database dump
    /// directories and restore every one found.
    #[arg(long)]
    all_databases: bool,

    /// Ignore any existing `continue.json` and restore every collection
    /// from the beginning instead of resuming.
    #[arg(long)]
    ignore_existing_progress: bool,

    /// Worker threads sending restore requests.
    #[arg(long, default_value_t = 4)]
    worker_threads: usize,

    /// Extra attempts for the initial connect handshake, before giving up.
    /// Does not apply to in-flight data or index requests.
    #[arg(long, default_value_t = 2)]
    initial_connect_retries: u32,

    /// Fetch the dump's encryption key from the OS keychain entry recorded
    /// under `input-directory` (set by `dumpkit-dump --encrypt` against the
    /// same path).
    #[arg(long)]
    decrypt: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all but error-level logs.
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing(quiet: bool, verbose: u8) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn decode_hex(text: &str) -> Option<[u8; 32]> {
    if text.len() != 64 {
        return None;
    }
    let mut key = [0u8; 32];
    for (i, chunk) in text.as_bytes().chunks(2).enumerate() {
        let byte_str = std::str::from_utf8(chunk).ok()?;
        key[i] = u8::from_str_radix(byte_str, 16).ok()?;
    }
    Some(key)
}

fn keyring_entry_name(input_directory: &Path) -> String {
    format!("dump:{}", input_directory.display())
}

fn resolve_encryption_key(args: &Args) -> Result<Option<[u8; 32]>> {
    if !args.decrypt {
        return Ok(None);
    }
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_entry_name(&args.input_directory))
        .context("opening OS keychain entry for the dump encryption key")?;
    let stored = entry.get_password().context("reading the encryption key from the OS keychain")?;
    let key = decode_hex(&stored).context("stored encryption key was not valid hex")?;
    Ok(Some(key))
}

fn resolve_password(args: &Args) -> Option<String> {
    args.password.clone().or_else(|| std::env::var(PASSWORD_ENV_VAR).ok())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.quiet, args.verbose);

    let encryption_key = resolve_encryption_key(&args)?;
    let password = resolve_password(&args);

    let options = RestoreOptions {
        connection: ConnectionOptions {
            base_url: args.server.clone(),
            database: args.database.clone(),
            username: args.username.clone(),
            password,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            force: args.force,
        },
        input_directory: args.input_directory.clone(),
        collections: args.collections.clone(),
        include_system_collections: args.include_system_collections,
        create_collections: args.create_collections,
        import_data: args.import_data,
        overwrite: args.overwrite,
        force: args.force,
        ignore_distribute_shards_like_errors: args.ignore_distribute_shards_like_errors,
        default_number_of_shards: args.default_number_of_shards,
        default_replication_factor: args.default_replication_factor,
        chunk_size: args.chunk_size,
        create_database: args.create_database,
        force_same_database: args.force_same_database,
        all_databases: args.all_databases,
        ignore_existing_progress: args.ignore_existing_progress,
        worker_threads: args.worker_threads,
        encryption_key,
        initial_connect_retries: args.initial_connect_retries,
    };

    info!(database = %args.database, input = %args.input_directory.display(), "starting restore");
    match run_restore(options) {
        Ok(stats) => {
            info!(
                documents = stats.documents_transferred(),
                bytes = stats.bytes_transferred(),
                batches = stats.batches_transferred(),
                "restore complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "restore failed");
            Err(anyhow::Error::from(e))
        }
    }
}
