//! Segment type: a permission-uniform slice of the address space.
//!
//! A segment does not know which addresses it is mapped at. The owning
//! interval map supplies the range, and the segment translates addresses in
//! that range into offsets within its buffer.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::address_interval::AddressInterval;
use crate::core::buffer::BufferPtr;
use crate::core::interval_map::MergePolicy;

bitflags! {
    /// Permission flags for memory segments.
    ///
    /// Bits above `PRIVATE` are opaque flags for other layers; they are kept
    /// and compared when segments merge but never interpreted here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct Protection: u32 {
        const READ = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const EXEC = 0x0000_0004;
        const PRIVATE = 0x0000_0010;

        const RW = Self::READ.bits() | Self::WRITE.bits();
        const RX = Self::READ.bits() | Self::EXEC.bits();
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();

        const _ = !0;
    }
}

impl Protection {
    /// Mask of the bits available to other layers.
    pub const FLAGS_MASK: u32 = 0xffff_fff0;

    /// True if these permissions include every `required` bit and no `prohibited` bit.
    pub fn permits(&self, required: Protection, prohibited: Protection) -> bool {
        self.contains(required) && !self.intersects(prohibited)
    }

    /// Parses permission letters `r`, `w`, `x`, `p` in any order; `-` is a
    /// placeholder. Returns `None` on any other character.
    pub fn from_letters(s: &str) -> Option<Protection> {
        s.chars().try_fold(Protection::empty(), |acc, c| match c {
            'r' => Some(acc | Protection::READ),
            'w' => Some(acc | Protection::WRITE),
            'x' => Some(acc | Protection::EXEC),
            'p' => Some(acc | Protection::PRIVATE),
            '-' => Some(acc),
            _ => None,
        })
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut perms = String::with_capacity(4);
        perms.push(if self.contains(Protection::READ) { 'r' } else { '-' });
        perms.push(if self.contains(Protection::WRITE) { 'w' } else { '-' });
        perms.push(if self.contains(Protection::EXEC) { 'x' } else { '-' });
        perms.push(if self.contains(Protection::PRIVATE) { 'p' } else { '-' });
        write!(f, "{}", perms)
    }
}

/// A contiguous, permission-uniform region backed by (part of) one buffer.
#[derive(Debug, Clone)]
pub struct Segment {
    buffer: BufferPtr,
    buffer_offset: u64,
    perms: Protection,
    name: String,
    cow: bool,
}

impl Segment {
    pub fn new(
        buffer: BufferPtr,
        buffer_offset: u64,
        perms: Protection,
        name: impl Into<String>,
    ) -> Self {
        Self {
            buffer,
            buffer_offset,
            perms,
            name: name.into(),
            cow: false,
        }
    }

    pub fn buffer(&self) -> &BufferPtr {
        &self.buffer
    }

    pub fn set_buffer(&mut self, buffer: BufferPtr) {
        self.buffer = buffer;
    }

    /// Offset of the segment's first address within the buffer.
    pub fn buffer_offset(&self) -> u64 {
        self.buffer_offset
    }

    pub fn set_buffer_offset(&mut self, offset: u64) {
        self.buffer_offset = offset;
    }

    /// Buffer offset for `va`, which must lie within `range`, the interval
    /// this segment is mapped at.
    pub fn buffer_offset_at(&self, range: &AddressInterval, va: u64) -> u64 {
        debug_assert!(range.contains(va));
        self.buffer_offset + (va - range.least())
    }

    pub fn perms(&self) -> Protection {
        self.perms
    }

    pub fn set_perms(&mut self, perms: Protection) {
        self.perms = perms;
    }

    /// Whether the next write through this segment must first copy its buffer.
    pub fn is_cow(&self) -> bool {
        self.cow
    }

    pub fn set_cow(&mut self, cow: bool) {
        self.cow = cow;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Checks that every address of `range` maps to a valid buffer offset.
    ///
    /// On failure the error carries the lowest address in `range` that does not.
    pub fn check(&self, range: &AddressInterval) -> Result<(), u64> {
        if range.is_empty() {
            return Ok(());
        }
        let size = self.buffer.size() as u64;
        if self.buffer_offset >= size {
            return Err(range.least());
        }
        let usable = size - self.buffer_offset;
        if range.size() > usable || (range.is_whole() && usable == u64::MAX) {
            return Err(range.least() + usable);
        }
        Ok(())
    }

    /// Combines the debug names of two merging segments.
    pub fn merge_names(&mut self, other: &Segment) {
        if other.name.is_empty() || self.name == other.name {
            return;
        }
        if self.name.is_empty() {
            self.name = other.name.clone();
        } else if !self.name.split('+').any(|part| part == other.name) {
            self.name = format!("{}+{}", self.name, other.name);
        }
    }
}

/// Segments are equal when they share the buffer, offset and permissions.
/// Names are not compared.
impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.buffer.ptr_eq(&other.buffer)
            && self.buffer_offset == other.buffer_offset
            && self.perms == other.perms
    }
}

impl Eq for Segment {}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}+{:#x}",
            self.perms,
            self.buffer.kind(),
            self.buffer.name(),
            self.buffer_offset
        )?;
        if self.cow {
            write!(f, " cow")?;
        }
        if !self.name.is_empty() {
            write!(f, " '{}'", self.name)?;
        }
        Ok(())
    }
}

/// Merge and split rules for segments stored in an interval map.
///
/// Two adjacent segments merge when they use the same buffer at contiguous
/// offsets with identical permission bits and copy-on-write state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentMergePolicy;

impl MergePolicy<Segment> for SegmentMergePolicy {
    fn merge(
        &self,
        left_range: &AddressInterval,
        left: &mut Segment,
        _right_range: &AddressInterval,
        right: &Segment,
    ) -> bool {
        let contiguous =
            left.buffer_offset.checked_add(left_range.size()) == Some(right.buffer_offset);
        if left.buffer.ptr_eq(&right.buffer)
            && contiguous
            && left.perms == right.perms
            && left.cow == right.cow
        {
            left.merge_names(right);
            return true;
        }
        false
    }

    fn split(&self, range: &AddressInterval, value: &mut Segment, split_point: u64) -> Segment {
        let mut right = value.clone();
        right.buffer_offset = value.buffer_offset + (split_point - range.least());
        right
    }

    fn truncate(&self, _range: &AddressInterval, _value: &mut Segment, _split_point: u64) {}
}
