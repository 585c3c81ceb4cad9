//! Bounded file access for file-backed buffers.
//!
//! Files are memory-mapped for performance, and every open is checked against
//! `IOLimits` so that a stray path cannot pull an arbitrarily large file into
//! the address space.

pub mod error;

use crate::io::error::{IoError, Result};
use memmap2::{Mmap, MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Defines the resource limits for file-backed buffers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IOLimits {
    /// The absolute maximum file size that can be mapped or loaded.
    pub max_file_size: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 4 * 1024 * 1024 * 1024, // 4GB
        }
    }
}

/// How a file mapping treats writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapMode {
    /// Read-only mapping; writes are refused.
    ReadOnly,
    /// Writes stay private to the mapping (copy-on-write at the page level).
    Private,
}

impl MapMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, MapMode::ReadOnly)
    }
}

/// A memory-mapped region of a file.
///
/// Zero-length regions carry no mapping because mmap cannot map empty ranges.
#[derive(Debug)]
pub enum MappedFile {
    Empty,
    ReadOnly(Mmap),
    Writable(MmapMut),
}

impl MappedFile {
    pub fn len(&self) -> usize {
        match self {
            MappedFile::Empty => 0,
            MappedFile::ReadOnly(m) => m.len(),
            MappedFile::Writable(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            MappedFile::Empty => &[],
            MappedFile::ReadOnly(m) => m,
            MappedFile::Writable(m) => m,
        }
    }

    /// Mutable view of the mapping, or `None` for read-only mappings.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            MappedFile::Writable(m) => Some(&mut m[..]),
            _ => None,
        }
    }
}

fn check_size(path: &Path, file_size: u64, limits: &IOLimits) -> Result<()> {
    if file_size > limits.max_file_size {
        warn!(
            path = %path.display(),
            size = file_size,
            limit = limits.max_file_size,
            "File is too large"
        );
        return Err(IoError::FileTooLarge {
            limit: limits.max_file_size,
            found: file_size,
        });
    }
    Ok(())
}

/// Maps `len` bytes of an already-open file starting at byte `offset`.
pub fn map_file_range(file: &File, offset: u64, len: usize, mode: MapMode) -> Result<MappedFile> {
    if len == 0 {
        return Ok(MappedFile::Empty);
    }
    let file_size = file.metadata()?.len();
    let end = offset.checked_add(len as u64);
    if end.map_or(true, |end| end > file_size) {
        return Err(IoError::RangeOutsideFile {
            offset,
            len: len as u64,
            file_size,
        });
    }

    let mut opts = MmapOptions::new();
    opts.offset(offset).len(len);
    // Safety: the mapping is backed by a regular file opened by the caller. Concurrent
    // modification of the file by another process is outside this crate's contract.
    let mapped = unsafe {
        match mode {
            MapMode::ReadOnly => MappedFile::ReadOnly(opts.map(file)?),
            MapMode::Private => MappedFile::Writable(opts.map_copy(file)?),
        }
    };
    trace!(offset, len, ?mode, "Mapped file range");
    Ok(mapped)
}

/// Opens a file and maps all of it.
pub fn map_file<P: AsRef<Path>>(path: P, mode: MapMode, limits: &IOLimits) -> Result<MappedFile> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    debug!(
        path = %path.display(),
        size = file_size,
        ?mode,
        limits.max_file_size = limits.max_file_size,
        "Mapping file"
    );
    check_size(path, file_size, limits)?;

    // The file handle is dropped here; the mapping stays valid on its own.
    map_file_range(&file, 0, file_size as usize, mode)
}

/// Reads the contents of a file from `start_offset` to its end.
pub fn read_file_from<P: AsRef<Path>>(
    path: P,
    start_offset: u64,
    limits: &IOLimits,
) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();
    check_size(path, file_size, limits)?;

    if start_offset >= file_size {
        return Ok(Vec::new());
    }
    file.seek(SeekFrom::Start(start_offset))?;
    let mut data = Vec::with_capacity((file_size - start_offset) as usize);
    file.read_to_end(&mut data)?;

    trace!(
        path = %path.display(),
        offset = start_offset,
        len = data.len(),
        "Read file contents"
    );
    Ok(data)
}
