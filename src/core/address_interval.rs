//! AddressInterval type for the virtual address space.
//!
//! This module provides the AddressInterval type that represents an inclusive
//! range of 64-bit addresses. Inclusive bounds let a single interval describe
//! the whole address space `[0, u64::MAX]`, which a half-open range cannot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive, contiguous range of 64-bit addresses.
///
/// The empty interval is a distinguished value (internally `least > greatest`).
/// `least()` and `greatest()` are meaningless for the empty interval; callers
/// check `is_empty()` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressInterval {
    lo: u64,
    hi: u64,
}

impl Default for AddressInterval {
    fn default() -> Self {
        Self::empty()
    }
}

impl AddressInterval {
    /// The empty interval.
    pub const fn empty() -> Self {
        Self { lo: 1, hi: 0 }
    }

    /// An interval containing a single address.
    pub const fn at(va: u64) -> Self {
        Self { lo: va, hi: va }
    }

    /// Interval from two inclusive endpoints, in either order.
    pub fn hull(a: u64, b: u64) -> Self {
        Self {
            lo: a.min(b),
            hi: a.max(b),
        }
    }

    /// Interval starting at `base` and containing `size` addresses.
    ///
    /// A zero size yields the empty interval; a size that would run past the
    /// end of the address space is clipped at `u64::MAX`.
    pub fn base_size(base: u64, size: u64) -> Self {
        if size == 0 {
            return Self::empty();
        }
        Self {
            lo: base,
            hi: base.saturating_add(size - 1),
        }
    }

    /// The entire 64-bit address space.
    pub const fn whole() -> Self {
        Self {
            lo: 0,
            hi: u64::MAX,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    /// Lowest address in the interval.
    pub fn least(&self) -> u64 {
        self.lo
    }

    /// Highest address in the interval.
    pub fn greatest(&self) -> u64 {
        self.hi
    }

    /// Number of addresses, saturating at `u64::MAX` for the whole space.
    pub fn size(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.hi - self.lo).saturating_add(1)
        }
    }

    pub fn is_whole(&self) -> bool {
        self.lo == 0 && self.hi == u64::MAX
    }

    pub fn contains(&self, va: u64) -> bool {
        !self.is_empty() && va >= self.lo && va <= self.hi
    }

    /// True if `other` lies entirely within this interval. The empty interval
    /// is contained in everything.
    pub fn contains_interval(&self, other: &AddressInterval) -> bool {
        other.is_empty() || (!self.is_empty() && other.lo >= self.lo && other.hi <= self.hi)
    }

    pub fn overlaps(&self, other: &AddressInterval) -> bool {
        !self.is_empty() && !other.is_empty() && self.lo <= other.hi && other.lo <= self.hi
    }

    /// True if this interval ends immediately before `other` begins.
    pub fn is_left_adjacent(&self, other: &AddressInterval) -> bool {
        !self.is_empty() && !other.is_empty() && self.hi != u64::MAX && self.hi + 1 == other.lo
    }

    pub fn intersection(&self, other: &AddressInterval) -> AddressInterval {
        if !self.overlaps(other) {
            return Self::empty();
        }
        Self {
            lo: self.lo.max(other.lo),
            hi: self.hi.min(other.hi),
        }
    }

    /// Smallest interval containing both intervals.
    pub fn join(&self, other: &AddressInterval) -> AddressInterval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    /// Split into `[least, at-1]` and `[at, greatest]`. Either half may be empty.
    pub fn split_at(&self, at: u64) -> (AddressInterval, AddressInterval) {
        if self.is_empty() {
            return (Self::empty(), Self::empty());
        }
        if at <= self.lo {
            return (Self::empty(), *self);
        }
        if at > self.hi {
            return (*self, Self::empty());
        }
        (
            Self {
                lo: self.lo,
                hi: at - 1,
            },
            Self { lo: at, hi: self.hi },
        )
    }
}

impl fmt::Display for AddressInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[empty]")
        } else {
            write!(f, "[{:#x}, {:#x}]", self.lo, self.hi)
        }
    }
}
