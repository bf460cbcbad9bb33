//! Maps collection names to their on-disk data files, rolling over to a new
//! numbered part when `split_files` is enabled and a part grows past its
//! size limit.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use crate::directory::{Compressed, DirectoryError, ManagedDirectory, ManagedFile, WriteChain};

struct OpenCollectionFile {
    file: ManagedFile<WriteChain>,
    part: u32,
    bytes_in_part: u64,
}

/// Hands out append-style access to `<cname>.data[.<part>].json[.gz]` files,
/// safe to call concurrently from many writer threads (one lock, held only
/// for the duration of a single record's write).
pub struct DumpFileProvider {
    directory: ManagedDirectory,
    split_files: bool,
    max_part_bytes: u64,
    compress: bool,
    open: Mutex<HashMap<String, OpenCollectionFile>>,
}

impl DumpFileProvider {
    /// Creates a provider backed by `directory`. `max_part_bytes` is only
    /// consulted when `split_files` is set.
    #[must_use]
    pub fn new(directory: ManagedDirectory, split_files: bool, max_part_bytes: u64, compress: bool) -> Self {
        Self { directory, split_files, max_part_bytes, compress, open: Mutex::new(HashMap::new()) }
    }

    fn file_name(&self, collection: &str, part: u32) -> String {
        let ext = if self.compress { "json.gz" } else { "json" };
        if self.split_files {
            format!("{collection}.data.{part:05}.{ext}")
        } else {
            format!("{collection}.data.{ext}")
        }
    }

    /// Appends `record` (one logical document, without its trailing
    /// newline) to `collection`'s current data file, rolling over to a new
    /// part first if needed.
    ///
    /// # Errors
    ///
    /// Propagates any [`DirectoryError`] from opening, closing, or writing
    /// a file.
    pub fn append_record(&self, collection: &str, record: &[u8]) -> Result<(), DirectoryError> {
        let mut open = self.open.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let needs_rollover = match open.get(collection) {
            None => true,
            #[allow(clippy::cast_possible_truncation)]
            Some(current) => {
                self.split_files && current.bytes_in_part + record.len() as u64 + 1 > self.max_part_bytes
            }
        };

        if needs_rollover {
            let next_part = open.get(collection).map_or(0, |current| current.part + 1);
            if let Some(previous) = open.remove(collection) {
                previous.file.close()?;
            }
            let name = self.file_name(collection, next_part);
            let compressed = if self.compress { Compressed::Gzip } else { Compressed::Plain };
            let file = self.directory.writable_file(&name, compressed, true)?;
            open.insert(collection.to_string(), OpenCollectionFile { file, part: next_part, bytes_in_part: 0 });
        }

        let entry = open.get_mut(collection).expect("just inserted or already present");
        entry
            .file
            .write_all(record)
            .and_then(|()| entry.file.write_all(b"\n"))
            .map_err(|e| DirectoryError::io(self.file_name(collection, entry.part), e))?;
        entry.bytes_in_part += record.len() as u64 + 1;
        Ok(())
    }

    /// Flushes and closes every file still open. Must be called once all
    /// writers for this provider have finished.
    ///
    /// # Errors
    ///
    /// Propagates the first close error encountered, after attempting to
    /// close every remaining file.
    pub fn finish(self) -> Result<(), DirectoryError> {
        let open = self.open.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut first_error = None;
        for (_name, entry) in open {
            if let Err(e) = entry.file.close() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The underlying directory, for writing structure/view files directly.
    #[must_use]
    pub fn directory(&self) -> &ManagedDirectory {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::EncryptionScheme;
    use tempfile::tempdir;

    #[test]
    fn single_file_mode_keeps_one_part() {
        let dir = tempdir().unwrap();
        let managed = ManagedDirectory::create(dir.path(), EncryptionScheme::None, false).unwrap();
        let provider = DumpFileProvider::new(managed, false, 1024, false);
        provider.append_record("widgets", b"{\"a\":1}").unwrap();
        provider.append_record("widgets", b"{\"a\":2}").unwrap();
        provider.finish().unwrap();

        let reopened = ManagedDirectory::open_existing(dir.path(), None).unwrap();
        let contents = reopened.slurp_file("widgets.data.json", Compressed::Plain).unwrap();
        assert_eq!(contents, b"{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn split_files_roll_over_past_size_limit() {
        let dir = tempdir().unwrap();
        let managed = ManagedDirectory::create(dir.path(), EncryptionScheme::None, false).unwrap();
        let provider = DumpFileProvider::new(managed, true, 10, false);
        provider.append_record("widgets", b"123456789").unwrap();
        provider.append_record("widgets", b"abc").unwrap();
        provider.finish().unwrap();

        let reopened = ManagedDirectory::open_existing(dir.path(), None).unwrap();
        let part0 = reopened.slurp_file("widgets.data.00000.json", Compressed::Plain).unwrap();
        let part1 = reopened.slurp_file("widgets.data.00001.json", Compressed::Plain).unwrap();
        assert_eq!(part0, b"123456789\n");
        assert_eq!(part1, b"abc\n");
    }
}
