//! Dump planner and jobs: walks a database's collections, writes structure
//! and view files, and streams each collection's documents to disk either
//! directly ([`DumpCollectionJob`]) or through the higher-throughput
//! [`ParallelDumpServer`] path used in cluster mode.

mod cursor;
mod engine;
mod error;
mod file_provider;
mod jobs;
mod options;
mod parallel_server;
mod shards;

pub use engine::{run_dump, run_dump_with_masking};
pub use error::DumpError;
pub use file_provider::DumpFileProvider;
pub use jobs::{DumpCollectionJob, DumpShardJob};
pub use options::DumpOptions;
pub use parallel_server::ParallelDumpServer;
