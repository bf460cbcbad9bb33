//! The unit of work a [`super::ClientTaskQueue`] runs.

use crate::http::ManagedClient;

/// One piece of work a worker thread runs against its owned client.
///
/// Dump and restore jobs (`DumpCollectionJob`, `DumpShardJob`,
/// `RestoreSendJob`, ...) implement this so the queue never needs to know
/// which kind of job it is running.
pub trait Job: Send {
    /// Runs the job to completion against `client`, reporting any failure
    /// as a formatted string (the queue aggregates these; the first one
    /// reported becomes the operation's overall error).
    fn run(&self, client: &mut ManagedClient) -> Result<(), String>;
}
