//! MemoryView: bounded reads by virtual address.
//!
//! Consumers that only scan memory (string finders, instruction decoders)
//! can be written against this trait instead of `MemoryMap` itself.

use bytes::Bytes;

use crate::core::byte_order::Endianness;
use crate::core::segment::Protection;
use crate::error::{MapError, Result};
use crate::map::MemoryMap;

/// Bounded memory reads by virtual address.
pub trait MemoryView {
    /// Read exactly `len` bytes starting at `va`.
    fn read_bytes(&self, va: u64, len: usize) -> Result<Bytes>;

    /// Convenience: read a little/big-endian u16.
    fn read_u16(&self, va: u64, endian: Endianness) -> Result<u16> {
        let b = self.read_bytes(va, 2)?;
        Ok(endian.decode(&b) as u16)
    }

    /// Convenience: read a little/big-endian u32.
    fn read_u32(&self, va: u64, endian: Endianness) -> Result<u32> {
        let b = self.read_bytes(va, 4)?;
        Ok(endian.decode(&b) as u32)
    }

    /// Convenience: read a little/big-endian u64.
    fn read_u64(&self, va: u64, endian: Endianness) -> Result<u64> {
        let b = self.read_bytes(va, 8)?;
        Ok(endian.decode(&b))
    }
}

impl MemoryView for MemoryMap {
    fn read_bytes(&self, va: u64, len: usize) -> Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let data = self.read_vec(va, len, Protection::READ, Protection::empty());
        if data.len() < len {
            return Err(MapError::NotMapped {
                map: self.summary(),
                va: va.wrapping_add(data.len() as u64),
            });
        }
        Ok(Bytes::from(data))
    }
}
