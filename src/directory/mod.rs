//! On-disk container format for dump/restore output: a directory of managed
//! files, each optionally gzip-compressed and/or encrypted.
//!
//! A `ManagedDirectory` owns a filesystem path and an [`EncryptionScheme`]
//! shared by every file opened through it. An `ENCRYPTION` sidecar file at
//! the directory root records which scheme was used so a later `restore`
//! invocation (which only has a directory path, not the original CLI flags)
//! can recover it without being told again.

pub mod error;

mod encryption;

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use encryption::EncryptionScheme;
use encryption::{ReadCodec, WriteCodec};
pub use error::DirectoryError;

const ENCRYPTION_SIDECAR: &str = "ENCRYPTION";

/// Whether gzip compression is applied to a given file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressed {
    /// Write/read the file as plain bytes (beyond any encryption layer).
    Plain,
    /// Write/read the file through gzip.
    Gzip,
}

/// A directory of managed files sharing one encryption scheme.
///
/// Layering order on write is plaintext -> gzip -> encrypt -> raw file;
/// reading reverses it. Gzip is applied first (innermost) so compression
/// sees the real data, not ciphertext, which does not compress.
pub struct ManagedDirectory {
    path: PathBuf,
    scheme: EncryptionScheme,
}

impl ManagedDirectory {
    /// Opens an existing directory, reading its `ENCRYPTION` sidecar to
    /// recover the scheme used to write it. `key` is required if the
    /// sidecar names a scheme that needs one.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if the directory or sidecar cannot be
    /// read, or the sidecar names an unsupported scheme.
    pub fn open_existing(path: impl Into<PathBuf>, key: Option<[u8; 32]>) -> Result<Self, DirectoryError> {
        let path = path.into();
        let sidecar_path = path.join(ENCRYPTION_SIDECAR);
        let tag = fs::read_to_string(&sidecar_path)
            .map_err(|e| DirectoryError::io(&sidecar_path, e))?;
        let scheme = EncryptionScheme::from_tag(tag.trim(), key)?;
        Ok(Self { path, scheme })
    }

    /// Creates a new output directory. Fails if the directory already has
    /// entries unless `overwrite` is set.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::CannotOverwriteDirectory`] for a non-empty
    /// target without `overwrite`, or an I/O error creating the directory or
    /// writing the `ENCRYPTION` sidecar.
    pub fn create(
        path: impl Into<PathBuf>,
        scheme: EncryptionScheme,
        overwrite: bool,
    ) -> Result<Self, DirectoryError> {
        let path = path.into();
        match fs::read_dir(&path) {
            Ok(mut entries) => {
                if !overwrite && entries.next().is_some() {
                    return Err(DirectoryError::CannotOverwriteDirectory(path));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&path).map_err(|e| DirectoryError::io(&path, e))?;
            }
            Err(e) => return Err(DirectoryError::io(&path, e)),
        }
        let sidecar_path = path.join(ENCRYPTION_SIDECAR);
        fs::write(&sidecar_path, scheme.tag()).map_err(|e| DirectoryError::io(&sidecar_path, e))?;
        Ok(Self { path, scheme })
    }

    /// Root path of this directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn full_path(&self, relative_name: &str) -> PathBuf {
        self.path.join(relative_name)
    }

    /// Opens `relative_name` for writing, applying gzip/encryption as
    /// configured. Fails if the file already exists unless `overwrite`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::FileExists`] or an underlying I/O error.
    pub fn writable_file(
        &self,
        relative_name: &str,
        compressed: Compressed,
        overwrite: bool,
    ) -> Result<ManagedFile<WriteChain>, DirectoryError> {
        let path = self.full_path(relative_name);
        if !overwrite && path.exists() {
            return Err(DirectoryError::FileExists(path));
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| DirectoryError::io(&path, e))?;
        let chain = WriteChain::build(BufWriter::new(file), &self.scheme, compressed)?;
        Ok(ManagedFile { path, chain })
    }

    /// Opens `relative_name` for reading, reversing whatever
    /// gzip/encryption layering was used to write it.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::FileNotFound`] or an underlying I/O error.
    pub fn readable_file(
        &self,
        relative_name: &str,
        compressed: Compressed,
    ) -> Result<ManagedFile<ReadChain>, DirectoryError> {
        let path = self.full_path(relative_name);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DirectoryError::FileNotFound(path.clone())
            } else {
                DirectoryError::io(&path, e)
            }
        })?;
        let chain = ReadChain::build(BufReader::new(file), &self.scheme, compressed)?;
        Ok(ManagedFile { path, chain })
    }

    /// Writes `contents` to `relative_name` in one call.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`Self::writable_file`] or the write itself.
    pub fn spit_file(
        &self,
        relative_name: &str,
        contents: &[u8],
        compressed: Compressed,
        overwrite: bool,
    ) -> Result<(), DirectoryError> {
        let mut file = self.writable_file(relative_name, compressed, overwrite)?;
        file.write_all(contents)
            .map_err(|e| DirectoryError::io(self.full_path(relative_name), e))?;
        file.close()
    }

    /// Reads the entirety of `relative_name` into a `Vec<u8>`.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`Self::readable_file`] or the read itself.
    pub fn slurp_file(&self, relative_name: &str, compressed: Compressed) -> Result<Vec<u8>, DirectoryError> {
        let mut file = self.readable_file(relative_name, compressed)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| DirectoryError::io(self.full_path(relative_name), e))?;
        Ok(buf)
    }

    /// Deserializes `relative_name` as JSON.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from [`Self::slurp_file`] or a JSON parse error.
    pub fn value_from_json_file<T: DeserializeOwned>(
        &self,
        relative_name: &str,
        compressed: Compressed,
    ) -> Result<T, DirectoryError> {
        let bytes = self.slurp_file(relative_name, compressed)?;
        serde_json::from_slice(&bytes).map_err(|e| DirectoryError::json(self.full_path(relative_name), e))
    }

    /// Serializes `value` as JSON into `relative_name`.
    ///
    /// # Errors
    ///
    /// Propagates a JSON serialization error or any error from
    /// [`Self::spit_file`].
    pub fn value_to_json_file<T: Serialize>(
        &self,
        relative_name: &str,
        value: &T,
        compressed: Compressed,
        overwrite: bool,
    ) -> Result<(), DirectoryError> {
        let bytes = serde_json::to_vec(value).map_err(|e| DirectoryError::json(self.full_path(relative_name), e))?;
        self.spit_file(relative_name, &bytes, compressed, overwrite)
    }
}

/// Write-side codec chain for a single managed file. An enum rather than a
/// boxed trait object because both gzip and the encryption layer need a
/// consuming `finish()` to flush their trailers (gzip footer, final AEAD
/// chunk), which `Box<dyn Write>` cannot express.
pub enum WriteChain {
    Raw(WriteCodec<BufWriter<File>>),
    Gzip(GzEncoder<WriteCodec<BufWriter<File>>>),
}

impl WriteChain {
    fn build(
        inner: BufWriter<File>,
        scheme: &EncryptionScheme,
        compressed: Compressed,
    ) -> Result<Self, DirectoryError> {
        let codec = scheme.wrap_write(inner)?;
        Ok(match compressed {
            Compressed::Plain => Self::Raw(codec),
            Compressed::Gzip => Self::Gzip(GzEncoder::new(codec, Compression::default())),
        })
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            Self::Raw(codec) => codec.finish().map(|_| ()),
            Self::Gzip(encoder) => encoder.finish().and_then(WriteCodec::finish).map(|_| ()),
        }
    }
}

impl Write for WriteChain {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Raw(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Raw(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

/// Read-side codec chain, mirroring [`WriteChain`].
pub enum ReadChain {
    Raw(ReadCodec<BufReader<File>>),
    Gzip(GzDecoder<ReadCodec<BufReader<File>>>),
}

impl ReadChain {
    fn build(
        inner: BufReader<File>,
        scheme: &EncryptionScheme,
        compressed: Compressed,
    ) -> Result<Self, DirectoryError> {
        let codec = scheme.wrap_read(inner)?;
        Ok(match compressed {
            Compressed::Plain => Self::Raw(codec),
            Compressed::Gzip => Self::Gzip(GzDecoder::new(codec)),
        })
    }
}

impl Read for ReadChain {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Raw(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
        }
    }
}

/// A single file opened through a [`ManagedDirectory`], generic over the
/// direction of its codec chain ([`WriteChain`] or [`ReadChain`]).
pub struct ManagedFile<C> {
    path: PathBuf,
    chain: C,
}

impl ManagedFile<WriteChain> {
    /// Flushes and finalizes every codec layer (gzip footer, final
    /// encryption chunk). Must be called for the trailers to be written;
    /// dropping a `ManagedFile<WriteChain>` without calling this leaves a
    /// truncated, unreadable file.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Io`] if any layer fails to flush.
    pub fn close(self) -> Result<(), DirectoryError> {
        let path = self.path.clone();
        self.chain.finish().map_err(|e| DirectoryError::io(path, e))
    }
}

impl Write for ManagedFile<WriteChain> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.chain.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.chain.flush()
    }
}

impl Read for ManagedFile<ReadChain> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.chain.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chacha20poly1305::Key;
    use tempfile::tempdir;

    #[test]
    fn plain_round_trip() {
        let dir = tempdir().unwrap();
        let md = ManagedDirectory::create(dir.path(), EncryptionScheme::None, false).unwrap();
        md.spit_file("a.json", b"{\"x\":1}", Compressed::Plain, false).unwrap();
        let bytes = md.slurp_file("a.json", Compressed::Plain).unwrap();
        assert_eq!(bytes, b"{\"x\":1}");
    }

    #[test]
    fn gzip_round_trip() {
        let dir = tempdir().unwrap();
        let md = ManagedDirectory::create(dir.path(), EncryptionScheme::None, false).unwrap();
        let payload = vec![b'q'; 10_000];
        md.spit_file("b.json.gz", &payload, Compressed::Gzip, false).unwrap();
        let bytes = md.slurp_file("b.json.gz", Compressed::Gzip).unwrap();
        assert_eq!(bytes, payload);
    }

    #[test]
    fn encrypted_round_trip_via_open_existing() {
        let dir = tempdir().unwrap();
        let key = [3u8; 32];
        let scheme = EncryptionScheme::ChaCha20Poly1305 { key: *Key::from_slice(&key) };
        {
            let md = ManagedDirectory::create(dir.path(), scheme, false).unwrap();
            md.spit_file("secret.data", b"top secret payload", Compressed::Plain, false)
                .unwrap();
        }
        let reopened = ManagedDirectory::open_existing(dir.path(), Some(key)).unwrap();
        let bytes = reopened.slurp_file("secret.data", Compressed::Plain).unwrap();
        assert_eq!(bytes, b"top secret payload");
    }

    #[test]
    fn encrypted_and_gzipped_round_trip() {
        let dir = tempdir().unwrap();
        let key = [5u8; 32];
        let scheme = EncryptionScheme::ChaCha20Poly1305 { key: *Key::from_slice(&key) };
        let md = ManagedDirectory::create(dir.path(), scheme, false).unwrap();
        let payload = vec![b'z'; 200_000];
        md.spit_file("c.json.gz", &payload, Compressed::Gzip, false).unwrap();
        let bytes = md.slurp_file("c.json.gz", Compressed::Gzip).unwrap();
        assert_eq!(bytes, payload);
    }

    #[test]
    fn open_existing_without_key_fails_for_encrypted_directory() {
        let dir = tempdir().unwrap();
        let scheme = EncryptionScheme::ChaCha20Poly1305 { key: *Key::from_slice(&[1u8; 32]) };
        ManagedDirectory::create(dir.path(), scheme, false).unwrap();
        let err = ManagedDirectory::open_existing(dir.path(), None).unwrap_err();
        assert!(matches!(err, DirectoryError::EncryptionKeyRequired(_)));
    }

    #[test]
    fn writable_file_refuses_overwrite_by_default() {
        let dir = tempdir().unwrap();
        let md = ManagedDirectory::create(dir.path(), EncryptionScheme::None, false).unwrap();
        md.spit_file("dup.json", b"1", Compressed::Plain, false).unwrap();
        let err = md.spit_file("dup.json", b"2", Compressed::Plain, false).unwrap_err();
        assert!(matches!(err, DirectoryError::FileExists(_)));
        md.spit_file("dup.json", b"2", Compressed::Plain, true).unwrap();
        assert_eq!(md.slurp_file("dup.json", Compressed::Plain).unwrap(), b"2");
    }

    #[test]
    fn create_refuses_nonempty_directory_without_overwrite() {
        let dir = tempdir().unwrap();
        ManagedDirectory::create(dir.path(), EncryptionScheme::None, false).unwrap();
        let err = ManagedDirectory::create(dir.path(), EncryptionScheme::None, false).unwrap_err();
        assert!(matches!(err, DirectoryError::CannotOverwriteDirectory(_)));
        ManagedDirectory::create(dir.path(), EncryptionScheme::None, true).unwrap();
    }

    #[test]
    fn readable_file_reports_missing_file() {
        let dir = tempdir().unwrap();
        let md = ManagedDirectory::create(dir.path(), EncryptionScheme::None, false).unwrap();
        let err = md.slurp_file("missing.json", Compressed::Plain).unwrap_err();
        assert!(matches!(err, DirectoryError::FileNotFound(_)));
    }

    #[test]
    fn json_value_round_trip() {
        use serde::{Deserialize, Serialize};

        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Sample {
            name: String,
            count: u32,
        }

        let dir = tempdir().unwrap();
        let md = ManagedDirectory::create(dir.path(), EncryptionScheme::None, false).unwrap();
        let value = Sample { name: "widgets".into(), count: 42 };
        md.value_to_json_file("sample.json", &value, Compressed::Plain, false).unwrap();
        let read_back: Sample = md.value_from_json_file("sample.json", Compressed::Plain).unwrap();
        assert_eq!(read_back, value);
    }
}
