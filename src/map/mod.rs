//! MemoryMap: a sparse virtual address space built from segments.
//!
//! The map owns an interval map from address ranges to segments. This module
//! holds construction, copying and the structural operations (inserting,
//! erasing, protecting, locating free space). Data transfer lives in
//! `access`, byte searches in `search`, and dump/load in `persist`.

mod access;
pub mod persist;
mod search;
mod view;

pub use search::BytePredicate;
pub use view::MemoryView;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, trace, warn};

use crate::config::MapConfig;
use crate::core::address_interval::AddressInterval;
use crate::core::buffer::{Buffer, BufferPtr};
use crate::core::byte_order::Endianness;
use crate::core::interval_map::{DefaultMergePolicy, IntervalMap};
use crate::core::segment::{Protection, Segment, SegmentMergePolicy};
use crate::error::{MapError, MapSummary, Result, SegmentSummary};
use crate::io::MapMode;

/// Address ranges mapped to the segments that back them.
pub type Segments = IntervalMap<Segment, SegmentMergePolicy>;

/// How `MemoryMap::copy` treats the source's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyLevel {
    /// Both maps share every buffer; writes through either are visible to both.
    Shallow,
    /// Buffers are shared until the first write through either map, which
    /// gives the writer its own copy.
    CopyOnWrite,
    /// Every buffer is duplicated immediately.
    Deep,
}

/// A sparse 64-bit virtual address space.
///
/// `Clone` is a shallow copy: the new map has its own segment table but
/// shares buffers with the original.
#[derive(Debug, Clone, Default)]
pub struct MemoryMap {
    segments: Segments,
    config: MapConfig,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MapConfig) -> Self {
        Self {
            segments: Segments::new(),
            config,
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut MapConfig {
        &mut self.config
    }

    /// Byte order used by `read_uint` and `write_uint`.
    pub fn byte_order(&self) -> Endianness {
        self.config.byte_order
    }

    pub fn set_byte_order(&mut self, order: Endianness) {
        self.config.byte_order = order;
    }

    /// A copy of this map at the given level.
    ///
    /// A copy-on-write copy marks the segments of both maps, so the first
    /// write through either one unshares the affected buffer.
    pub fn copy(&mut self, level: CopyLevel) -> MemoryMap {
        match level {
            CopyLevel::Shallow => self.clone(),
            CopyLevel::CopyOnWrite => {
                for segment in self.segments.values_mut() {
                    segment.set_cow(true);
                }
                debug!(segments = self.segments.len(), "Copy-on-write copy");
                self.clone()
            }
            CopyLevel::Deep => {
                let mut copy = self.clone();
                let mut clones: HashMap<usize, BufferPtr> = HashMap::new();
                for segment in copy.segments.values_mut() {
                    let buffer = segment.buffer().clone();
                    let fresh = clones
                        .entry(buffer.id())
                        .or_insert_with(|| buffer.deep_clone())
                        .clone();
                    segment.set_buffer(fresh);
                    segment.set_cow(false);
                }
                debug!(
                    segments = copy.segments.len(),
                    buffers = clones.len(),
                    "Deep copy"
                );
                copy
            }
        }
    }

    /// Replaces this map's contents with a copy of `source`.
    pub fn init(&mut self, source: &mut MemoryMap, level: CopyLevel) {
        *self = source.copy(level);
    }

    pub fn summary(&self) -> MapSummary {
        MapSummary {
            segments: self.segments.len(),
            hull: self.segments.hull(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Number of mapped addresses, saturating at `u64::MAX`.
    pub fn size(&self) -> u64 {
        self.segments.size()
    }

    pub fn hull(&self) -> AddressInterval {
        self.segments.hull()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn segments(&self) -> &Segments {
        &self.segments
    }

    /// Segments in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = (&AddressInterval, &Segment)> + '_ {
        self.segments.iter()
    }

    /// Maps `range` to `segment`.
    ///
    /// The segment's buffer must be able to back every address of the range.
    /// When `erase_prior` is false, overlapping an existing mapping is an
    /// error unless the overlap already maps to the same buffer bytes with the
    /// same permissions. A failed insert leaves the map unchanged.
    pub fn insert(
        &mut self,
        range: AddressInterval,
        segment: Segment,
        erase_prior: bool,
    ) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        if let Err(first_bad) = segment.check(&range) {
            warn!(range = %range, segment = %segment, first_bad, "Buffer too small for range");
            return Err(MapError::BufferTooSmall {
                map: self.summary(),
                range,
                buffer: segment.buffer().name(),
                buffer_size: segment.buffer().size() as u64,
                offset: segment.buffer_offset(),
                first_bad,
            });
        }
        if !erase_prior {
            let conflict = self
                .segments
                .overlapping(range)
                .find(|(old_range, old)| !consistent(&range, &segment, old_range, old));
            if let Some((old_range, old)) = conflict {
                warn!(range = %range, existing = %old_range, "Inconsistent mapping");
                return Err(MapError::Inconsistent {
                    map: self.summary(),
                    new_range: range,
                    new_segment: SegmentSummary::from(&segment),
                    old_range: *old_range,
                    old_segment: SegmentSummary::from(old),
                });
            }
        }
        debug!(range = %range, segment = %segment, "Inserting segment");
        self.segments.insert(range, segment);
        Ok(())
    }

    /// Maps the contents of a file at `va`. Returns the number of bytes mapped.
    ///
    /// Writable mappings are private, so writes never reach the file. An
    /// empty `name` defaults to the file's path.
    pub fn insert_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        va: u64,
        writable: bool,
        erase_prior: bool,
        name: &str,
    ) -> Result<u64> {
        let path = path.as_ref();
        let mode = if writable {
            MapMode::Private
        } else {
            MapMode::ReadOnly
        };
        let buffer = Buffer::mmap_file(path, mode, &self.config.io)?.into_ptr();
        let size = buffer.size() as u64;
        if size == 0 {
            debug!(path = %path.display(), "Empty file not mapped");
            return Ok(0);
        }
        let mut perms = Protection::READ;
        if writable {
            perms |= Protection::WRITE;
        }
        let name = if name.is_empty() {
            path.display().to_string()
        } else {
            name.to_string()
        };
        let range = AddressInterval::base_size(va, size);
        self.insert(range, Segment::new(buffer, 0, perms, name), erase_prior)?;
        Ok(range.size())
    }

    /// Unmaps every address in `range`.
    pub fn erase(&mut self, range: AddressInterval) {
        trace!(range = %range, "Erasing range");
        self.segments.erase(range);
    }

    /// Removes every node whose segment equals `segment`. Returns the number removed.
    pub fn erase_segment(&mut self, segment: &Segment) -> usize {
        self.segments.retain(|_, s| s != segment)
    }

    /// The first address of `range` that is unmapped or lacks the permissions.
    fn first_missing(
        &self,
        range: AddressInterval,
        required: Protection,
        prohibited: Protection,
    ) -> Option<u64> {
        if range.is_empty() {
            return None;
        }
        let mut va = range.least();
        loop {
            match self.segments.find(va) {
                Some((r, s)) if s.perms().permits(required, prohibited) => {
                    if r.greatest() >= range.greatest() {
                        return None;
                    }
                    va = r.greatest() + 1;
                }
                _ => return Some(va),
            }
        }
    }

    /// True if every address of `range` is mapped with the required
    /// permissions and none of the prohibited ones. Vacuously true when empty.
    pub fn exists(
        &self,
        range: AddressInterval,
        required: Protection,
        prohibited: Protection,
    ) -> bool {
        self.first_missing(range, required, prohibited).is_none()
    }

    /// The lowest mapped address at or above `va` whose segment satisfies the permissions.
    pub fn next(&self, va: u64, required: Protection, prohibited: Protection) -> Option<u64> {
        self.segments
            .iter_from(va)
            .find(|(_, s)| s.perms().permits(required, prohibited))
            .map(|(r, _)| r.least().max(va))
    }

    /// The node containing `va`, or `NotMapped` if there is none.
    pub fn at(&self, va: u64) -> Result<(AddressInterval, &Segment)> {
        self.find(va).ok_or_else(|| MapError::NotMapped {
            map: self.summary(),
            va,
        })
    }

    /// Like `at`, without building an error for unmapped addresses.
    pub fn find(&self, va: u64) -> Option<(AddressInterval, &Segment)> {
        self.segments.find(va).map(|(r, s)| (*r, s))
    }

    /// The lowest address at or above `start`, aligned to `alignment`, that
    /// begins `size` unmapped bytes. An alignment of zero means one.
    pub fn find_free(&self, start: u64, size: u64, alignment: u64) -> Result<u64> {
        let alignment = alignment.max(1);
        let mut va = start;
        while let Some(gap) = self.segments.free_from(va) {
            if let Some(candidate) = align_up(gap.least(), alignment) {
                if candidate <= gap.greatest()
                    && (size == 0 || gap.greatest() - candidate >= size - 1)
                {
                    trace!(start, size, alignment, found = candidate, "Found free space");
                    return Ok(candidate);
                }
            }
            if gap.greatest() == u64::MAX {
                break;
            }
            va = gap.greatest() + 1;
        }
        Err(MapError::NoFreeSpace {
            map: self.summary(),
            size,
        })
    }

    /// The start of the highest unmapped region that begins at or below `max`.
    pub fn find_last_free(&self, max: u64) -> Result<u64> {
        self.segments
            .free_down_from(max)
            .map(|gap| gap.least())
            .ok_or_else(|| MapError::NoFreeSpace {
                map: self.summary(),
                size: 1,
            })
    }

    /// Calls `visitor` for each segment in ascending address order.
    pub fn traverse<F>(&self, mut visitor: F)
    where
        F: FnMut(&AddressInterval, &Segment),
    {
        for (range, segment) in self.segments.iter() {
            visitor(range, segment);
        }
    }

    /// Removes segments for which `predicate` returns true. Returns how many were removed.
    pub fn prune<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&AddressInterval, &Segment) -> bool,
    {
        let removed = self.segments.retain(|range, segment| !predicate(range, segment));
        debug!(removed, "Pruned segments");
        removed
    }

    /// Keeps segments that have any of the `required` bits (or all segments
    /// when `required` is empty) and none of the `prohibited` bits.
    pub fn prune_perms(&mut self, required: Protection, prohibited: Protection) -> usize {
        self.prune(|_, segment| {
            let perms = segment.perms();
            let wanted = required.is_empty() || perms.intersects(required);
            !(wanted && !perms.intersects(prohibited))
        })
    }

    /// Sets the permissions of every address in `range`, splitting segments
    /// at the range's ends. Unless `relax` is set, every address must be mapped.
    pub fn mprotect(&mut self, range: AddressInterval, perms: Protection, relax: bool) -> Result<()> {
        self.modify_perms(range, relax, |_| perms)
    }

    /// Adds and then removes permission bits for every address in `range`.
    pub fn mmodify(
        &mut self,
        range: AddressInterval,
        add: Protection,
        remove: Protection,
        relax: bool,
    ) -> Result<()> {
        self.modify_perms(range, relax, |perms| (perms | add) - remove)
    }

    fn modify_perms<F>(&mut self, range: AddressInterval, relax: bool, change: F) -> Result<()>
    where
        F: Fn(Protection) -> Protection,
    {
        if range.is_empty() {
            return Ok(());
        }
        if !relax {
            if let Some(va) = self.first_missing(range, Protection::empty(), Protection::empty()) {
                return Err(MapError::NotMapped {
                    map: self.summary(),
                    va,
                });
            }
        }
        let pieces: Vec<(AddressInterval, Segment)> = self
            .segments
            .overlapping(range)
            .map(|(r, s)| {
                let piece = r.intersection(&range);
                let mut segment = s.clone();
                segment.set_buffer_offset(s.buffer_offset_at(r, piece.least()));
                segment.set_perms(change(s.perms()));
                (piece, segment)
            })
            .collect();
        debug!(range = %range, pieces = pieces.len(), "Changing permissions");
        for (piece, segment) in pieces {
            self.segments.insert(piece, segment);
        }
        Ok(())
    }

    /// Mapped address ranges with adjacent segments coalesced.
    pub fn va_extents(&self) -> IntervalMap<(), DefaultMergePolicy> {
        let mut extents = IntervalMap::new();
        for (range, _) in self.segments.iter() {
            extents.insert(*range, ());
        }
        extents
    }
}

/// True if `new` maps the overlap of the two ranges to the same bytes as `old`.
fn consistent(
    new_range: &AddressInterval,
    new: &Segment,
    old_range: &AddressInterval,
    old: &Segment,
) -> bool {
    let overlap = new_range.intersection(old_range);
    if overlap.is_empty() {
        return true;
    }
    new.buffer().ptr_eq(old.buffer())
        && new.buffer_offset_at(new_range, overlap.least())
            == old.buffer_offset_at(old_range, overlap.least())
        && new.perms() == old.perms()
        && new.is_cow() == old.is_cow()
}

fn align_up(va: u64, alignment: u64) -> Option<u64> {
    if va % alignment == 0 {
        Some(va)
    } else {
        (va / alignment + 1).checked_mul(alignment)
    }
}

impl fmt::Display for MemoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return writeln!(f, "(empty)");
        }
        for (range, segment) in self.segments.iter() {
            writeln!(
                f,
                "va {:#018x} + {:#018x} = {}",
                range.least(),
                range.size(),
                segment
            )?;
        }
        Ok(())
    }
}
