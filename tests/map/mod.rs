//! Integration tests for memory maps.

mod copy_levels;
mod persist;
mod read_write;
mod search;
