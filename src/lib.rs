//! Core parallel dump/restore engine.
//!
//! This library drives the client-side half of exporting a database from a
//! server cluster and restoring it back. It does not implement a server: it
//! assumes a cooperating HTTP server that exposes batch-dump and
//! batch-restore endpoints, and it does not parse command-line arguments —
//! callers build a validated [`dump::DumpOptions`] or
//! [`restore::RestoreOptions`] and hand it to [`dump::run_dump`] /
//! [`restore::run_restore`].
//!
//! # Architecture
//!
//! - [`channel`] - fixed-capacity producer/consumer queue with graceful shutdown
//! - [`directory`] - on-disk container format: encrypted/compressed managed files
//! - [`http`] - HTTP client construction, URL rewriting, response classification
//! - [`workers`] - a pool of worker threads draining a shared job queue
//! - [`progress`] - durable per-collection resume bookkeeping (`continue.json`)
//! - [`masking`] - extension point for per-record transforms (no-op by default)
//! - [`dump`] - dump planner and jobs
//! - [`restore`] - restore planner and jobs
//!
//! Everything here runs on plain OS threads and blocking HTTP calls; there is
//! no async runtime anywhere in the core.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod directory;
pub mod dump;
pub mod error;
pub mod http;
pub mod masking;
pub mod progress;
pub mod restore;
pub mod stats;
pub mod workers;

pub use error::CoreError;
pub use stats::Stats;
