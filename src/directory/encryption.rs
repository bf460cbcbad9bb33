//! Streaming AEAD framing over `ChaCha20Poly1305`.
//!
//! The AEAD primitive itself has no native streaming mode: `Aead::encrypt`
//! operates on one buffer and returns one authenticated ciphertext. This
//! module frames a logical byte stream as a sequence of independently
//! authenticated chunks so arbitrarily large `ManagedFile` content can be
//! encrypted and decrypted incrementally, closing over the same idea as a
//! single whole-buffer AEAD call generalized to many.
//!
//! Wire format per file: a 4-byte random nonce prefix, then zero or more
//! frames of `[u32 BE ciphertext_len][ciphertext || 16-byte tag]`. The nonce
//! for chunk `i` is `prefix || be_bytes(i as u64)` (12 bytes total); the
//! prefix is unique per file so the counter never needs to restart under the
//! same nonce twice for a given key.

use std::io::{self, Read, Write};

use chacha20poly1305::aead::{Aead, KeyInit, OsRng, rand_core::RngCore};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use super::error::DirectoryError;

/// Plaintext bytes buffered per chunk before encryption.
pub const CHUNK_SIZE: usize = 64 * 1024;

const NONCE_PREFIX_LEN: usize = 4;
const COUNTER_LEN: usize = 8;

/// The encryption scheme applied to every file in a [`super::ManagedDirectory`].
///
/// Modelled as a closed enum rather than a trait object: the core supports
/// exactly one real scheme plus the "none" passthrough, and key material is
/// always supplied by the caller, never derived or stored by this crate.
#[derive(Clone)]
pub enum EncryptionScheme {
    /// No encryption; files are written and read as-is.
    None,
    /// `ChaCha20Poly1305` with the framing described in the module docs.
    ChaCha20Poly1305 {
        /// 256-bit symmetric key, supplied by the caller (CLI/key source),
        /// never derived or stored by this crate.
        key: Key,
    },
}

impl EncryptionScheme {
    /// The tag written to/read from the `ENCRYPTION` sidecar file.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ChaCha20Poly1305 { .. } => "chacha20poly1305",
        }
    }

    /// Resolves a sidecar tag plus optional key bytes into a scheme.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::EncryptionKeyRequired`] if the tag needs a
    /// key but none was given, and
    /// [`DirectoryError::UnsupportedEncryptionScheme`] for an unknown tag.
    pub fn from_tag(tag: &str, key: Option<[u8; 32]>) -> Result<Self, DirectoryError> {
        match tag {
            "none" | "" => Ok(Self::None),
            "chacha20poly1305" => match key {
                Some(bytes) => Ok(Self::ChaCha20Poly1305 {
                    key: *Key::from_slice(&bytes),
                }),
                None => Err(DirectoryError::EncryptionKeyRequired(tag.to_string())),
            },
            other => Err(DirectoryError::UnsupportedEncryptionScheme(other.to_string())),
        }
    }

    pub(crate) fn wrap_write<W: Write>(&self, inner: W) -> Result<WriteCodec<W>, DirectoryError> {
        match self {
            Self::None => Ok(WriteCodec::Plain(inner)),
            Self::ChaCha20Poly1305 { key } => {
                EncryptWriter::new(inner, key).map(WriteCodec::Encrypted)
            }
        }
    }

    pub(crate) fn wrap_read<R: Read>(&self, inner: R) -> Result<ReadCodec<R>, DirectoryError> {
        match self {
            Self::None => Ok(ReadCodec::Plain(inner)),
            Self::ChaCha20Poly1305 { key } => {
                DecryptReader::new(inner, key).map(ReadCodec::Encrypted)
            }
        }
    }
}

/// Either a bare writer or one wrapped in chunked AEAD encryption.
pub(crate) enum WriteCodec<W: Write> {
    Plain(W),
    Encrypted(EncryptWriter<W>),
}

impl<W: Write> Write for WriteCodec<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Encrypted(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Encrypted(w) => w.flush(),
        }
    }
}

impl<W: Write> WriteCodec<W> {
    /// Finalizes the codec (flushes the last, possibly partial, AEAD chunk)
    /// and returns the underlying writer.
    pub(crate) fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(w) => Ok(w),
            Self::Encrypted(w) => w.finish(),
        }
    }
}

/// Either a bare reader or one wrapped in chunked AEAD decryption.
pub(crate) enum ReadCodec<R: Read> {
    Plain(R),
    Encrypted(DecryptReader<R>),
}

impl<R: Read> Read for ReadCodec<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Encrypted(r) => r.read(buf),
        }
    }
}

/// Writes a plaintext stream as a sequence of authenticated chunks.
pub(crate) struct EncryptWriter<W: Write> {
    inner: W,
    cipher: ChaCha20Poly1305,
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
    counter: u64,
    buffer: Vec<u8>,
}

impl<W: Write> EncryptWriter<W> {
    fn new(mut inner: W, key: &Key) -> Result<Self, DirectoryError> {
        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        OsRng.fill_bytes(&mut nonce_prefix);
        inner
            .write_all(&nonce_prefix)
            .map_err(|e| DirectoryError::io("<managed file>", e))?;
        Ok(Self {
            inner,
            cipher: ChaCha20Poly1305::new(key),
            nonce_prefix,
            counter: 0,
            buffer: Vec::with_capacity(CHUNK_SIZE),
        })
    }

    fn nonce(&self) -> Nonce {
        let mut bytes = [0u8; NONCE_PREFIX_LEN + COUNTER_LEN];
        bytes[..NONCE_PREFIX_LEN].copy_from_slice(&self.nonce_prefix);
        bytes[NONCE_PREFIX_LEN..].copy_from_slice(&self.counter.to_be_bytes());
        *Nonce::from_slice(&bytes)
    }

    fn flush_chunk(&mut self, up_to: usize) -> io::Result<()> {
        if up_to == 0 {
            return Ok(());
        }
        let plaintext: Vec<u8> = self.buffer.drain(..up_to).collect();
        let nonce = self.nonce();
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| io::Error::other(format!("encryption failed: {e}")))?;
        self.counter += 1;
        #[allow(clippy::cast_possible_truncation)]
        let len = ciphertext.len() as u32;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(&ciphertext)?;
        Ok(())
    }

    fn finish(mut self) -> io::Result<W> {
        let remaining = self.buffer.len();
        self.flush_chunk(remaining)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        while self.buffer.len() >= CHUNK_SIZE {
            self.flush_chunk(CHUNK_SIZE)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reads a ciphertext stream produced by [`EncryptWriter`] back into plaintext.
pub(crate) struct DecryptReader<R: Read> {
    inner: R,
    cipher: ChaCha20Poly1305,
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
    counter: u64,
    pending: Vec<u8>,
    pending_pos: usize,
    eof: bool,
}

impl<R: Read> DecryptReader<R> {
    fn new(mut inner: R, key: &Key) -> Result<Self, DirectoryError> {
        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        inner
            .read_exact(&mut nonce_prefix)
            .map_err(|e| DirectoryError::io("<managed file>", e))?;
        Ok(Self {
            inner,
            cipher: ChaCha20Poly1305::new(key),
            nonce_prefix,
            counter: 0,
            pending: Vec::new(),
            pending_pos: 0,
            eof: false,
        })
    }

    fn nonce(&self) -> Nonce {
        let mut bytes = [0u8; NONCE_PREFIX_LEN + COUNTER_LEN];
        bytes[..NONCE_PREFIX_LEN].copy_from_slice(&self.nonce_prefix);
        bytes[NONCE_PREFIX_LEN..].copy_from_slice(&self.counter.to_be_bytes());
        *Nonce::from_slice(&bytes)
    }

    fn fill_next_chunk(&mut self) -> io::Result<()> {
        let mut len_bytes = [0u8; 4];
        match read_exact_or_eof(&mut self.inner, &mut len_bytes)? {
            None => {
                self.eof = true;
                Ok(())
            }
            Some(()) => {
                let len = u32::from_be_bytes(len_bytes) as usize;
                let mut ciphertext = vec![0u8; len];
                self.inner.read_exact(&mut ciphertext)?;
                let nonce = self.nonce();
                let plaintext = self.cipher.decrypt(&nonce, ciphertext.as_ref()).map_err(|e| {
                    io::Error::other(format!("chunk authentication failed: {e}"))
                })?;
                self.counter += 1;
                self.pending = plaintext;
                self.pending_pos = 0;
                Ok(())
            }
        }
    }
}

/// Like `read_exact`, but returns `Ok(None)` instead of erroring when the
/// very first byte is unavailable (clean EOF between frames).
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<Option<()>> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated chunk length prefix",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(()))
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending_pos >= self.pending.len() && !self.eof {
            self.fill_next_chunk()?;
        }
        if self.pending_pos >= self.pending.len() {
            return Ok(0);
        }
        let available = &self.pending[self.pending_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        Ok(n)
    }
}
