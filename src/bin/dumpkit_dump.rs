//! CLI entry point for exporting a database to a dump directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chacha20poly1305::Key;
use chacha20poly1305::aead::{OsRng, rand_core::RngCore};
use clap::Parser;
use dumpkit_core::directory::EncryptionScheme;
use dumpkit_core::dump::{DumpOptions, run_dump};
use dumpkit_core::http::ConnectionOptions;
use tracing::{error, info};

const KEYRING_SERVICE: &str = "dumpkit";
const PASSWORD_ENV_VAR: &str = "DUMPKIT_PASSWORD";

/// Exports a database's collections, structures, and (in cluster mode)
/// per-shard data to a local dump directory.
#[derive(Parser, Debug)]
#[command(name = "dumpkit-dump", version, about)]
struct Args {
    /// Server base URL, e.g. http://localhost:8529.
    #[arg(long)]
    server: String,

    /// Database to dump from.
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

    /// Directory to write the dump into.
    #[arg(long)]
    output_directory: PathBuf,

    /// Overwrite an existing, non-empty output directory.
    #[arg(long)]
    overwrite: bool,

    /// Downgrade an incompatible server version from a fatal error to a
    /// logged warning.
    #[arg(long)]
    force: bool,

    /// Include `_`-prefixed system collections.
    #[arg(long)]
    include_system_collections: bool,

    /// Dump only this collection; repeatable. Defaults to every collection.
    #[arg(long = "collection")]
    collections: Vec<String>,

    /// Skip this collection even if otherwise selected; repeatable.
    #[arg(long = "exclude-collection")]
    excluded_collections: Vec<String>,

    /// Also dump each collection's view definition, if any.
    #[arg(long)]
    dump_views: bool,

    /// Network threads per DBserver, used only in cluster mode.
    #[arg(long, default_value_t = 4)]
    dbserver_worker_threads: usize,

    /// Writer threads per DBserver, used only in cluster mode.
    #[arg(long, default_value_t = 2)]
    local_writer_threads: usize,

    /// Bounded channel capacity between a DBserver's network and writer
    /// threads.
    #[arg(long, default_value_t = 8)]
    dbserver_prefetch_batches: usize,

    /// Collection-level parallelism in single-server mode.
    #[arg(long, default_value_t = 4)]
    collection_threads: usize,

    /// Split a collection's data file once a part exceeds
    /// `max-file-size-bytes`.
    #[arg(long)]
    split_files: bool,

    /// Byte ceiling per split data file part.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    max_file_size_bytes: u64,

    /// Gzip-compress every content file.
    #[arg(long)]
    compress: bool,

    /// Encrypt the output directory, storing the key in the OS keychain
    /// under an entry scoped to `output-directory`.
    #[arg(long)]
    encrypt: bool,

    /// TTL requested for each dump context, in seconds.
    #[arg(long, default_value_t = 600)]
    context_ttl_secs: u64,

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

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
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

fn keyring_entry_name(output_directory: &Path) -> String {
    format!("dump:{}", output_directory.display())
}

/// Resolves (or, on first use, mints and persists) the encryption key for
/// `output_directory` in the OS keychain. Never touches the core with raw
/// key bytes except through the returned [`EncryptionScheme`].
fn resolve_encryption(args: &Args) -> Result<EncryptionScheme> {
    if !args.encrypt {
        return Ok(EncryptionScheme::None);
    }
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_entry_name(&args.output_directory))
        .context("opening OS keychain entry for the dump encryption key")?;
    let key = match entry.get_password() {
        Ok(stored) => decode_hex(&stored).context("stored encryption key was not valid hex")?,
        Err(keyring::Error::NoEntry) => {
            let mut key = [0u8; 32];
            OsRng.fill_bytes(&mut key);
            entry.set_password(&encode_hex(&key)).context("storing the new encryption key in the OS keychain")?;
            key
        }
        Err(e) => return Err(e).context("reading the encryption key from the OS keychain"),
    };
    Ok(EncryptionScheme::ChaCha20Poly1305 { key: *Key::from_slice(&key) })
}

fn resolve_password(args: &Args) -> Option<String> {
    args.password.clone().or_else(|| std::env::var(PASSWORD_ENV_VAR).ok())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.quiet, args.verbose);

    let encryption = resolve_encryption(&args)?;
    let password = resolve_password(&args);

    let options = DumpOptions {
        connection: ConnectionOptions {
            base_url: args.server.clone(),
            database: args.database.clone(),
            username: args.username.clone(),
            password,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            force: args.force,
        },
        output_directory: args.output_directory.clone(),
        overwrite: args.overwrite,
        include_system_collections: args.include_system_collections,
        collections: args.collections.clone(),
        excluded_collections: args.excluded_collections.clone(),
        dump_views: args.dump_views,
        dbserver_worker_threads: args.dbserver_worker_threads,
        local_writer_threads: args.local_writer_threads,
        dbserver_prefetch_batches: args.dbserver_prefetch_batches,
        collection_threads: args.collection_threads,
        split_files: args.split_files,
        max_file_size_bytes: args.max_file_size_bytes,
        compress: args.compress,
        encryption,
        context_ttl: Duration::from_secs(args.context_ttl_secs),
    };

    info!(database = %args.database, output = %args.output_directory.display(), "starting dump");
    match run_dump(options) {
        Ok(stats) => {
            info!(
                documents = stats.documents_transferred(),
                bytes = stats.bytes_transferred(),
                batches = stats.batches_transferred(),
                "dump complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "dump failed");
            Err(anyhow::Error::from(e))
        }
    }
}
