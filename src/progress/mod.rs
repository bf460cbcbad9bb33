//! Durable per-collection resume bookkeeping (`continue.json`).
//!
//! Both the dump and restore engines update one collection's state at a
//! time from whichever worker thread just finished a batch for it. Writes
//! are coalesced: if a write is already queued when a second update lands,
//! the second update just extends the in-memory map and trusts the queued
//! write to pick it up, instead of hitting the filesystem twice.

mod error;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

pub use error::ProgressError;

use crate::directory::{Compressed, DirectoryError, ManagedDirectory};

const CONTINUATION_FILE: &str = "continue.json";
const CONTINUATION_VERSION: u32 = 1;

/// Lifecycle of a single collection's restore (or dump) progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CollectionState {
    /// No work has started on this collection yet.
    Unknown,
    /// The collection has been created on the target server.
    Created,
    /// Data is actively being sent/received for this collection.
    Restoring,
    /// The collection finished successfully.
    Restored,
}

impl Default for CollectionState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// The resume watermark within a collection's split data files: the file
/// number and byte offset of the last chunk the server has acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytesAcked {
    /// Index of the file (`<cname>.data.<fileNo>.json[.gz]`) last acked.
    #[serde(rename = "fileNo")]
    pub file_no: u32,
    /// Byte offset within that file, cut at a newline boundary.
    #[serde(rename = "readOffset")]
    pub read_offset: u64,
}

/// The full resumable state of one collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionProgress {
    /// Current lifecycle state.
    pub state: CollectionState,
    /// Last data watermark acknowledged by the server.
    #[serde(rename = "bytesAcked", default)]
    pub bytes_acked: BytesAcked,
}

#[derive(Serialize, Deserialize)]
struct ContinuationFile {
    version: u32,
    collections: HashMap<String, CollectionProgress>,
}

/// In-memory map of per-collection progress, mirrored to `continue.json`
/// on every update (coalesced under concurrent writers).
pub struct ProgressTracker {
    directory: ManagedDirectory,
    collection_states: RwLock<HashMap<String, CollectionProgress>>,
    write_file_mutex: Mutex<()>,
    write_queued: AtomicBool,
}

impl ProgressTracker {
    /// Opens a tracker bound to `directory`. Unless `ignore_existing`, loads
    /// any prior `continue.json` so an interrupted run can resume.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::UnsupportedContinuationVersion`] if the file
    /// was written by an incompatible version, or propagates a directory
    /// read error other than "file not found".
    pub fn new(directory: ManagedDirectory, ignore_existing: bool) -> Result<Self, ProgressError> {
        let mut collection_states = HashMap::new();
        if !ignore_existing {
            match directory.value_from_json_file::<ContinuationFile>(CONTINUATION_FILE, Compressed::Plain) {
                Ok(file) => {
                    if file.version != CONTINUATION_VERSION {
                        return Err(ProgressError::UnsupportedContinuationVersion {
                            found: file.version,
                            expected: CONTINUATION_VERSION,
                        });
                    }
                    collection_states = file.collections;
                }
                Err(DirectoryError::FileNotFound(_)) => {}
                Err(other) => return Err(other.into()),
            }
        }
        Ok(Self {
            directory,
            collection_states: RwLock::new(collection_states),
            write_file_mutex: Mutex::new(()),
            write_queued: AtomicBool::new(false),
        })
    }

    /// Current progress for `collection_name`, or the default (unknown)
    /// state if nothing has been recorded for it yet.
    #[must_use]
    pub fn get_status(&self, collection_name: &str) -> CollectionProgress {
        self.collection_states
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(collection_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Records `status` for `collection_name` and persists the full map to
    /// `continue.json`, unless a write triggered by a concurrent update is
    /// already in flight.
    ///
    /// # Errors
    ///
    /// Propagates a directory write error.
    pub fn update_status(&self, collection_name: &str, status: CollectionProgress) -> Result<(), ProgressError> {
        {
            let mut states = self.collection_states.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            states.insert(collection_name.to_string(), status);
            if self.write_queued.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
        }
        self.flush()
    }

    fn flush(&self) -> Result<(), ProgressError> {
        let _file_guard = self.write_file_mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let snapshot = {
            let mut states = self.collection_states.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            self.write_queued.store(false, Ordering::Release);
            states.clone()
        };
        let file = ContinuationFile { version: CONTINUATION_VERSION, collections: snapshot };
        self.directory
            .value_to_json_file(CONTINUATION_FILE, &file, Compressed::Plain, true)?;
        Ok(())
    }
}
