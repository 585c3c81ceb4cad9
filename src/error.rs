//! Error types for memory map operations.
//!
//! Errors carry plain summaries of the map and segments involved instead of
//! references to them, so they can outlive the map and cross threads.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::address_interval::AddressInterval;
use crate::core::segment::{Protection, Segment};
use crate::io::error::IoError;

/// Shape of the map an error was raised against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSummary {
    pub segments: usize,
    pub hull: AddressInterval,
}

impl fmt::Display for MapSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} segment(s) spanning {}", self.segments, self.hull)
    }
}

/// Identifying details of a segment named in an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSummary {
    pub buffer: String,
    pub buffer_offset: u64,
    pub perms: Protection,
    pub name: String,
}

impl From<&Segment> for SegmentSummary {
    fn from(segment: &Segment) -> Self {
        Self {
            buffer: segment.buffer().name(),
            buffer_offset: segment.buffer_offset(),
            perms: segment.perms(),
            name: segment.name().to_string(),
        }
    }
}

impl fmt::Display for SegmentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}+{:#x}", self.perms, self.buffer, self.buffer_offset)?;
        if !self.name.is_empty() {
            write!(f, " '{}'", self.name)?;
        }
        Ok(())
    }
}

/// Main error type for memory map operations.
#[derive(Debug, Error)]
pub enum MapError {
    /// A new mapping conflicts with an existing one
    #[error("Inconsistent mapping: {new_range} ({new_segment}) conflicts with {old_range} ({old_segment}) in map of {map}")]
    Inconsistent {
        map: MapSummary,
        new_range: AddressInterval,
        new_segment: SegmentSummary,
        old_range: AddressInterval,
        old_segment: SegmentSummary,
    },

    /// An address that had to be mapped is not
    #[error("Address {va:#x} is not mapped in map of {map}")]
    NotMapped { map: MapSummary, va: u64 },

    /// No unmapped region satisfies the request
    #[error("No free space for {size:#x} byte(s) in map of {map}")]
    NoFreeSpace { map: MapSummary, size: u64 },

    /// Malformed index file
    #[error("Syntax error at {}:{}{}: {message}", .file.display(), .line, column_suffix(.column))]
    SyntaxError {
        map: MapSummary,
        file: PathBuf,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// A segment's buffer cannot back the requested range
    #[error("Range {range} needs more than buffer {buffer} holds ({buffer_size} bytes from offset {offset:#x}); first bad address {first_bad:#x}")]
    BufferTooSmall {
        map: MapSummary,
        range: AddressInterval,
        buffer: String,
        buffer_size: u64,
        offset: u64,
        first_bad: u64,
    },

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl From<std::io::Error> for MapError {
    fn from(err: std::io::Error) -> Self {
        MapError::Io(IoError::StdIo(err))
    }
}

impl MapError {
    /// Summary of the map the error was raised against, if it has one.
    pub fn map(&self) -> Option<&MapSummary> {
        match self {
            MapError::Inconsistent { map, .. }
            | MapError::NotMapped { map, .. }
            | MapError::NoFreeSpace { map, .. }
            | MapError::SyntaxError { map, .. }
            | MapError::BufferTooSmall { map, .. } => Some(map),
            MapError::Io(_) => None,
        }
    }
}

fn column_suffix(column: &Option<usize>) -> String {
    column.map(|c| format!(":{}", c)).unwrap_or_default()
}

/// Result type alias for memory map operations
pub type Result<T> = std::result::Result<T, MapError>;
