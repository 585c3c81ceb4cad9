//! Saving a map as an index file plus data files, and loading it back.
//!
//! The index is line oriented. Blank lines and lines starting with `#` are
//! ignored; every other line describes one segment with fields separated by
//! whitespace or commas:
//!
//! ```text
//! 0x00401000 0x00002000 r-x- dump-00401000.data 0x00000000 .text
//! ```
//!
//! The fields are the start address, the size, permission letters, the data
//! source (everything up to the next `0x` token), the offset into the source,
//! and an optional name. Numbers are hex with a `0x` prefix or decimal.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

use crate::core::address_interval::AddressInterval;
use crate::core::buffer::{Buffer, BufferPtr};
use crate::core::segment::{Protection, Segment};
use crate::error::{MapError, Result};
use crate::io::error::IoError;
use crate::io::MapMode;
use crate::map::MemoryMap;
use crate::{log_error, span_trace};

const DUMP_CHUNK: usize = 1024 * 1024;

/// One segment line of an index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub va: u64,
    pub size: u64,
    pub perms: Protection,
    pub source: String,
    pub offset: u64,
    pub name: String,
}

/// A malformed index line. Columns are 1-based byte positions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("column {column}: {message}")]
pub struct IndexParseError {
    pub column: usize,
    pub message: String,
}

fn is_separator(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b','
}

fn parse_number(token: &str) -> Option<u64> {
    match token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

struct Fields<'a> {
    line: &'a str,
    pos: usize,
}

impl<'a> Fields<'a> {
    fn error(&self, at: usize, message: String) -> IndexParseError {
        IndexParseError {
            column: at + 1,
            message,
        }
    }

    fn skip_separators(&mut self) {
        let bytes = self.line.as_bytes();
        while self.pos < bytes.len() && is_separator(bytes[self.pos]) {
            self.pos += 1;
        }
    }

    fn token(&mut self) -> (usize, &'a str) {
        self.skip_separators();
        let bytes = self.line.as_bytes();
        let start = self.pos;
        while self.pos < bytes.len() && !is_separator(bytes[self.pos]) {
            self.pos += 1;
        }
        (start, &self.line[start..self.pos])
    }

    fn number(&mut self, what: &str) -> std::result::Result<u64, IndexParseError> {
        let (at, token) = self.token();
        if token.is_empty() {
            return Err(self.error(at, format!("expected {}", what)));
        }
        parse_number(token).ok_or_else(|| self.error(at, format!("invalid {} '{}'", what, token)))
    }

    fn perms(&mut self) -> std::result::Result<Protection, IndexParseError> {
        let (at, token) = self.token();
        if token.is_empty() {
            return Err(self.error(at, "expected permissions".to_string()));
        }
        Protection::from_letters(token)
            .ok_or_else(|| self.error(at, format!("invalid permissions '{}'", token)))
    }

    /// Everything up to the next token that starts with `0x`.
    fn source(&mut self) -> std::result::Result<String, IndexParseError> {
        self.skip_separators();
        let bytes = self.line.as_bytes();
        let start = self.pos;
        let end = (start + 1..bytes.len()).find(|&i| {
            is_separator(bytes[i - 1])
                && (bytes[i..].starts_with(b"0x") || bytes[i..].starts_with(b"0X"))
        });
        let Some(end) = end else {
            return Err(self.error(start, "expected data source followed by offset".to_string()));
        };
        let source = self.line[start..end].trim_end_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        self.pos = end;
        Ok(source.to_string())
    }

    fn rest(&mut self) -> String {
        self.skip_separators();
        self.line[self.pos..].trim_end().to_string()
    }
}

/// Parses one index line. Returns `None` for blank and comment lines.
pub fn parse_index_line(line: &str) -> std::result::Result<Option<IndexEntry>, IndexParseError> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let mut fields = Fields { line, pos: 0 };
    let va = fields.number("address")?;
    let size = fields.number("size")?;
    let perms = fields.perms()?;
    let source = fields.source()?;
    let offset = fields.number("offset")?;
    let name = fields.rest();
    Ok(Some(IndexEntry {
        va,
        size,
        perms,
        source,
        offset,
        name,
    }))
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes the bytes `segment` maps at `range`, stopping at the first byte
/// its buffer cannot supply. Returns the number written.
fn write_segment_data(path: &Path, range: &AddressInterval, segment: &Segment) -> Result<u64> {
    let mut out = BufWriter::new(File::create(path)?);
    let buffer = segment.buffer().borrow();
    let mut chunk = vec![0u8; DUMP_CHUNK];
    let mut offset = segment.buffer_offset();
    let mut remaining = range.size();
    let mut written = 0u64;
    while remaining > 0 {
        let want = remaining.min(chunk.len() as u64) as usize;
        let got = buffer.read(&mut chunk[..want], offset);
        out.write_all(&chunk[..got])?;
        written += got as u64;
        if got < want {
            break;
        }
        offset += got as u64;
        remaining -= got as u64;
    }
    out.flush()?;
    Ok(written)
}

impl MemoryMap {
    /// Writes `<basename>.index` and one `<basename>-<address>.data` file per
    /// segment. Data files are named relative to the index.
    pub fn dump<P: AsRef<Path>>(&self, basename: P) -> Result<()> {
        let base = basename.as_ref();
        let persist = &self.config.persist;
        let span = span_trace!("memory_map.dump", basename = %base.display());
        let _guard = span.enter();

        let index_path = with_suffix(base, &format!(".{}", persist.index_extension));
        let mut index = BufWriter::new(File::create(&index_path)?);
        writeln!(index, "# {} segment(s)", self.segments.len())?;
        writeln!(index, "# address size perms source offset name")?;
        for (range, segment) in self.segments.iter() {
            let data_path = with_suffix(
                base,
                &format!("-{:08x}.{}", range.least(), persist.data_extension),
            );
            let written = write_segment_data(&data_path, range, segment)?;
            let file_name = data_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = segment.name().replace(['\n', '\r'], " ");
            let line = format!(
                "{:#010x} {:#010x} {} {} {:#010x} {}",
                range.least(),
                range.size(),
                segment.perms(),
                file_name,
                0,
                name
            );
            writeln!(index, "{}", line.trim_end())?;
            trace!(range = %range, written, file = %file_name, "Dumped segment");
        }
        index.flush()?;
        debug!(
            index = %index_path.display(),
            segments = self.segments.len(),
            "Dumped memory map"
        );
        Ok(())
    }

    /// Reads `<basename>.index` and maps each segment it lists, replacing
    /// whatever those addresses held. Relative data sources resolve against
    /// the index file's directory.
    ///
    /// On error the segments loaded so far remain mapped.
    pub fn load<P: AsRef<Path>>(&mut self, basename: P) -> Result<()> {
        let base = basename.as_ref();
        let span = span_trace!("memory_map.load", basename = %base.display());
        let _guard = span.enter();

        let index_path = with_suffix(base, &format!(".{}", self.config.persist.index_extension));
        let text = std::fs::read_to_string(&index_path)?;
        let dir = index_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut loaded = 0usize;
        for (lineno, line) in text.lines().enumerate() {
            let entry = match parse_index_line(line) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => {
                    return Err(log_error!(
                        MapError::SyntaxError {
                            map: self.summary(),
                            file: index_path.clone(),
                            line: lineno + 1,
                            column: Some(err.column),
                            message: err.message,
                        },
                        "malformed index line"
                    ));
                }
            };
            if entry.size == 0 {
                continue;
            }
            let source = Path::new(&entry.source);
            let source = if source.is_absolute() {
                source.to_path_buf()
            } else {
                dir.join(source)
            };
            let buffer = self.load_buffer(&source, entry.offset, entry.size)?;
            let range = AddressInterval::base_size(entry.va, entry.size);
            self.insert(range, Segment::new(buffer, 0, entry.perms, entry.name), true)?;
            loaded += 1;
        }
        debug!(index = %index_path.display(), loaded, "Loaded memory map");
        Ok(())
    }

    /// `size` bytes of `path` starting at `offset`, zero-extended if the file is short.
    fn load_buffer(&self, path: &Path, offset: u64, size: u64) -> Result<BufferPtr> {
        let limits = &self.config.io;
        let too_large = || IoError::FileTooLarge {
            limit: limits.max_file_size,
            found: size,
        };
        if size > limits.max_file_size {
            return Err(too_large().into());
        }
        let len = usize::try_from(size).map_err(|_| too_large())?;

        if self.config.persist.map_data_files {
            let file = File::open(path)?;
            let file_size = file.metadata()?.len();
            if offset.checked_add(size).is_some_and(|end| end <= file_size) {
                return Ok(Buffer::mmap_range(&file, offset, len, MapMode::Private)?.into_ptr());
            }
            debug!(path = %path.display(), offset, size, file_size, "Data file short; reading into memory");
        }
        let mut buffer = Buffer::heap_from_file(path, offset, limits)?;
        buffer.resize(len);
        Ok(buffer.into_ptr())
    }
}
