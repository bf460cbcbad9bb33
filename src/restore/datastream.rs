//! Reads a collection's `<cname>.data[.NNNNN].json[.gz]` file(s) back as a
//! sequence of chunks cut at the nearest newline, honoring dump's split-file
//! naming convention and a resume offset.
//!
//! Because the codec chain (gzip, encryption) is not seekable, "seeking" to
//! a resume offset means reading and discarding bytes from the start of the
//! file until that offset is reached -- always valid, since the offset was
//! itself a previously-cut newline boundary.

use std::io::Read;

use crate::directory::{Compressed, DirectoryError, ManagedDirectory, ManagedFile, ReadChain};

use super::error::RestoreError;
use super::state::BufferPool;

const READ_STEP: usize = 64 * 1024;

/// Whether a collection's data lives in one file or a numbered sequence of
/// parts, discovered by probing the filesystem (dump-time flags are not
/// available to restore).
#[derive(Clone, Copy)]
enum DataLayout {
    Single,
    Split,
}

fn file_name_for(collection: &str, layout: DataLayout, compressed: Compressed, file_no: u32) -> String {
    let ext = if matches!(compressed, Compressed::Gzip) { "json.gz" } else { "json" };
    match layout {
        DataLayout::Single => format!("{collection}.data.{ext}"),
        DataLayout::Split => format!("{collection}.data.{file_no:05}.{ext}"),
    }
}

fn exists(directory: &ManagedDirectory, relative_name: &str) -> Result<bool, RestoreError> {
    match directory.readable_file(relative_name, Compressed::Plain) {
        Ok(_) => Ok(true),
        Err(DirectoryError::FileNotFound(_)) => Ok(false),
        // A decode-layer failure still means the path exists; only a plain
        // file-not-found should be treated as "no such part".
        Err(_) => Ok(true),
    }
}

/// Probes `directory` for `collection`'s data files, determining layout and
/// compression by trying each naming convention in turn.
///
/// # Errors
///
/// Returns [`RestoreError::Directory`] if a probe fails for a reason other
/// than the file simply not existing.
pub(super) fn discover_data_files(
    directory: &ManagedDirectory,
    collection: &str,
) -> Result<Option<(DataLayoutHandle, Vec<u32>)>, RestoreError> {
    for (layout, compressed) in
        [(DataLayout::Single, Compressed::Plain), (DataLayout::Single, Compressed::Gzip)]
    {
        let name = file_name_for(collection, layout, compressed, 0);
        if exists(directory, &name)? {
            return Ok(Some((DataLayoutHandle { layout, compressed }, vec![0])));
        }
    }
    for compressed in [Compressed::Plain, Compressed::Gzip] {
        let mut parts = Vec::new();
        loop {
            let name = file_name_for(collection, DataLayout::Split, compressed, parts.len() as u32);
            if !exists(directory, &name)? {
                break;
            }
            parts.push(parts.len() as u32);
        }
        if !parts.is_empty() {
            return Ok(Some((DataLayoutHandle { layout: DataLayout::Split, compressed }, parts)));
        }
    }
    Ok(None)
}

/// Opaque handle identifying how a collection's data files are laid out on
/// disk, resolved once by [`discover_data_files`] and reused for every file
/// opened afterwards.
#[derive(Clone, Copy)]
pub(super) struct DataLayoutHandle {
    layout: DataLayout,
    compressed: Compressed,
}

fn open_data_file(
    directory: &ManagedDirectory,
    collection: &str,
    handle: DataLayoutHandle,
    file_no: u32,
) -> Result<ManagedFile<ReadChain>, RestoreError> {
    let name = file_name_for(collection, handle.layout, handle.compressed, file_no);
    Ok(directory.readable_file(&name, handle.compressed)?)
}

fn skip_bytes(collection: &str, file_no: u32, file: &mut ManagedFile<ReadChain>, mut offset: u64) -> Result<(), RestoreError> {
    let mut buf = vec![0u8; READ_STEP];
    while offset > 0 {
        let want = offset.min(buf.len() as u64) as usize;
        let read = file.read(&mut buf[..want]).map_err(|e| DirectoryError::io(format!("{collection}[{file_no}]"), e))?;
        if read == 0 {
            return Err(RestoreError::ResumeOffsetOutOfRange { collection: collection.to_string(), file_no, offset });
        }
        offset -= read as u64;
    }
    Ok(())
}

/// Streams `collection`'s data starting at `(start_file_index, start_offset)`
/// within `file_numbers`, invoking `dispatch(file_no, offset, chunk,
/// is_final_chunk)` for each chunk cut at the nearest newline.
///
/// `is_final_chunk` is `true` for exactly the last chunk of the last file:
/// callers use this to guarantee their own completion bookkeeping lands
/// deterministically rather than racing a dispatched sibling job.
///
/// # Errors
///
/// Propagates any error from opening or reading a data file, or from
/// `dispatch` itself.
#[allow(clippy::too_many_arguments)]
pub(super) fn stream_collection_data(
    directory: &ManagedDirectory,
    collection: &str,
    handle: DataLayoutHandle,
    file_numbers: &[u32],
    start_file_index: usize,
    start_offset: u64,
    chunk_size: usize,
    buffer_pool: &BufferPool,
    mut dispatch: impl FnMut(u32, u64, Vec<u8>, bool) -> Result<(), RestoreError>,
) -> Result<(), RestoreError> {
    for (index, &file_no) in file_numbers.iter().enumerate().skip(start_file_index) {
        let is_last_file = index + 1 == file_numbers.len();
        let mut file = open_data_file(directory, collection, handle, file_no)?;
        let mut position = if index == start_file_index { start_offset } else { 0 };
        if position > 0 {
            skip_bytes(collection, file_no, &mut file, position)?;
        }

        let mut carry: Vec<u8> = Vec::with_capacity(chunk_size * 2);
        let mut read_buf = vec![0u8; READ_STEP];
        loop {
            let mut hit_eof = false;
            while carry.len() < chunk_size {
                let n = file.read(&mut read_buf).map_err(|e| DirectoryError::io(format!("{collection}[{file_no}]"), e))?;
                if n == 0 {
                    hit_eof = true;
                    break;
                }
                carry.extend_from_slice(&read_buf[..n]);
            }
            if carry.is_empty() && hit_eof {
                break;
            }
            while carry.iter().rposition(|&b| b == b'\n').is_none() && !hit_eof {
                let n = file.read(&mut read_buf).map_err(|e| DirectoryError::io(format!("{collection}[{file_no}]"), e))?;
                if n == 0 {
                    hit_eof = true;
                    break;
                }
                carry.extend_from_slice(&read_buf[..n]);
            }

            let split_at = carry.iter().rposition(|&b| b == b'\n').map_or(carry.len(), |i| i + 1);
            if split_at == 0 {
                break;
            }
            let is_final = hit_eof && split_at == carry.len() && is_last_file;

            let mut chunk = buffer_pool.lease_buffer(split_at);
            chunk.extend_from_slice(&carry[..split_at]);
            carry.drain(..split_at);

            dispatch(file_no, position, chunk, is_final)?;
            position += split_at as u64;

            if carry.is_empty() && hit_eof {
                break;
            }
        }
    }
    Ok(())
}
