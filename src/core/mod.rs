//! Core data types for the virtual address-space map.
//!
//! This module contains the building blocks the memory map is assembled
//! from, starting with the AddressInterval type which every other type uses
//! to describe where in the address space it lives.

pub mod address_interval;
pub mod buffer;
pub mod byte_order;
pub mod interval_map;
pub mod segment;

pub use address_interval::AddressInterval;
pub use buffer::{Buffer, BufferKind, BufferPtr};
pub use byte_order::Endianness;
pub use interval_map::{DefaultMergePolicy, IntervalMap, MergePolicy};
pub use segment::{Protection, Segment, SegmentMergePolicy};
