//! Virtual address-space memory maps.
//!
//! A `MemoryMap` models a sparse 64-bit address space assembled from
//! segments. Each segment maps a contiguous range of addresses onto part of a
//! byte buffer (heap memory, a memory-mapped file, caller-owned memory, lazily
//! allocated zeros, or nothing at all) with its own access permissions.
//! Maps support permission-filtered reads and writes, byte searches, shallow,
//! deep and copy-on-write copies, and dumping to and loading from an index file.

/// Core data types module
pub mod core;

pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod map;

pub use crate::config::{MapConfig, PersistConfig};
pub use crate::core::{
    AddressInterval, Buffer, BufferKind, BufferPtr, Endianness, Protection, Segment,
};
pub use crate::error::{MapError, Result};
pub use crate::io::{IOLimits, MapMode};
pub use crate::map::{CopyLevel, MemoryMap, MemoryView};
