//! Common test utilities and helpers.
//!
//! This module provides map builders and file helpers shared by the
//! integration test modules.

#![allow(dead_code)]

use std::io::Write;
use tempfile::NamedTempFile;
use vamap::{AddressInterval, Buffer, MemoryMap, Protection, Segment};

/// No permission bits; used for "don't care" required/prohibited arguments.
pub const ANY: Protection = Protection::empty();

/// Creates a temporary file with the given content.
pub fn create_temp_file(content: &[u8]) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content).unwrap();
    temp_file
}

/// Maps a fresh heap buffer holding `data` at `va`.
pub fn map_heap(map: &mut MemoryMap, va: u64, data: &[u8], perms: Protection, name: &str) {
    let buffer = Buffer::from_vec(data.to_vec()).into_ptr();
    map.insert(
        AddressInterval::base_size(va, data.len() as u64),
        Segment::new(buffer, 0, perms, name),
        false,
    )
    .unwrap();
}

/// Builds a map from `(va, bytes, perms)` triples, one heap buffer each.
pub fn build_map(chunks: &[(u64, &[u8], Protection)]) -> MemoryMap {
    let mut map = MemoryMap::new();
    for &(va, data, perms) in chunks {
        map_heap(&mut map, va, data, perms, "");
    }
    map
}

/// Deterministic pseudo-random bytes.
pub fn pattern_bytes(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Every mapped range with its permissions and bytes, for comparing maps.
pub fn snapshot(map: &MemoryMap) -> Vec<(AddressInterval, Protection, Vec<u8>)> {
    map.iter()
        .map(|(range, segment)| {
            let data = map.read_vec(range.least(), range.size() as usize, ANY, ANY);
            (*range, segment.perms(), data)
        })
        .collect()
}

/// Test utilities for file operations
pub mod file_utils {
    use std::path::Path;

    /// Check if path exists with better error messages
    pub fn assert_path_exists<P: AsRef<Path>>(path: P, context: &str) {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            panic!("{}: Path does not exist: {:?}", context, path_ref);
        }
    }
}
