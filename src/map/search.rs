//! Byte-level searches over a memory map.

use memchr::{memchr, memchr2, memchr3, memmem};
use tracing::{debug, trace};

use crate::core::address_interval::AddressInterval;
use crate::core::segment::Protection;
use crate::map::MemoryMap;

/// Bytes read per step while scanning a contiguous run.
const SCAN_CHUNK: usize = 64 * 1024;

/// Bytes read per step by `read_string`.
const STRING_CHUNK: usize = 256;

/// Predicate over a single byte, used to end `read_string` early.
pub type BytePredicate<'a> = &'a dyn Fn(u8) -> bool;

impl MemoryMap {
    /// Reads a NUL-terminated string of at most `desired` bytes starting at `va`.
    ///
    /// Reading stops at the first NUL, at the first byte `valid` rejects, at
    /// the first byte `invalid` accepts, or where the address space stops
    /// being readable. The terminating byte is not included. Each byte becomes
    /// the char with the same code point.
    pub fn read_string(
        &self,
        va: u64,
        desired: usize,
        valid: Option<BytePredicate<'_>>,
        invalid: Option<BytePredicate<'_>>,
        required: Protection,
        prohibited: Protection,
    ) -> String {
        let mut text = String::new();
        let mut chunk = [0u8; STRING_CHUNK];
        let mut done = 0usize;
        while done < desired {
            let Some(at) = va.checked_add(done as u64) else {
                break;
            };
            let want = (desired - done).min(STRING_CHUNK);
            let got = self.read(&mut chunk[..want], at, required, prohibited);
            for &b in &chunk[..got] {
                if b == 0 || !valid.map_or(true, |f| f(b)) || invalid.map_or(false, |f| f(b)) {
                    return text;
                }
                text.push(char::from(b));
            }
            if got < want {
                break;
            }
            done += got;
        }
        text
    }

    /// Length of the prefix of `pattern` that matches memory at `va`.
    pub fn match_bytes(
        &self,
        va: u64,
        pattern: &[u8],
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        let data = self.read_vec(va, pattern.len(), required, prohibited);
        data.iter().zip(pattern).take_while(|(a, b)| a == b).count()
    }

    /// Address of the first occurrence of `pattern` lying entirely within
    /// `limits`. Matches never span an unreadable address. An empty pattern
    /// matches at the start of a non-empty `limits`.
    pub fn find_sequence(
        &self,
        limits: AddressInterval,
        pattern: &[u8],
        required: Protection,
        prohibited: Protection,
    ) -> Option<u64> {
        if limits.is_empty() {
            return None;
        }
        if pattern.is_empty() {
            return Some(limits.least());
        }
        let finder = memmem::Finder::new(pattern);
        let found = self.scan(limits, pattern.len() - 1, required, prohibited, |window| {
            finder.find(window)
        });
        trace!(limits = %limits, len = pattern.len(), found = ?found, "Sequence search");
        found
    }

    /// Address of the first byte within `limits` that is any of `set`.
    pub fn find_any(
        &self,
        limits: AddressInterval,
        set: &[u8],
        required: Protection,
        prohibited: Protection,
    ) -> Option<u64> {
        if limits.is_empty() || set.is_empty() {
            return None;
        }
        let mut table = [false; 256];
        for &b in set {
            table[usize::from(b)] = true;
        }
        self.scan(limits, 0, required, prohibited, |window| match set {
            [a] => memchr(*a, window),
            [a, b] => memchr2(*a, *b, window),
            [a, b, c] => memchr3(*a, *b, *c, window),
            _ => window.iter().position(|&b| table[usize::from(b)]),
        })
    }

    /// Feeds each readable run within `limits` to `find` in windows that
    /// overlap by `overlap` bytes. Returns the address of the first hit.
    fn scan<F>(
        &self,
        limits: AddressInterval,
        overlap: usize,
        required: Protection,
        prohibited: Protection,
        mut find: F,
    ) -> Option<u64>
    where
        F: FnMut(&[u8]) -> Option<usize>,
    {
        let chunk = SCAN_CHUNK.max(overlap.saturating_mul(2));
        let mut va = limits.least();
        loop {
            va = self
                .next(va, required, prohibited)
                .filter(|&v| v <= limits.greatest())?;
            let mut window: Vec<u8> = Vec::new();
            let mut window_va = va;
            let mut cursor = va;
            loop {
                let left = limits.greatest() - cursor;
                let want = if left >= (chunk - 1) as u64 {
                    chunk
                } else {
                    left as usize + 1
                };
                let got = self.read_vec(cursor, want, required, prohibited);
                window.extend_from_slice(&got);
                if let Some(pos) = find(&window) {
                    return Some(window_va + pos as u64);
                }
                if got.len() == want && cursor + (want as u64 - 1) == limits.greatest() {
                    return None;
                }
                if got.len() < want {
                    // The run ends here. Skip an unreadable segment entirely.
                    let end = cursor + got.len() as u64;
                    va = if got.is_empty() {
                        self.segments
                            .find(end)
                            .map_or(end, |(range, _)| range.greatest())
                            .checked_add(1)?
                    } else {
                        end
                    };
                    break;
                }
                cursor += got.len() as u64;
                let keep = overlap.min(window.len());
                let drop = window.len() - keep;
                window.drain(..drop);
                window_va += drop as u64;
            }
        }
    }

    /// Unmaps runs of at least `min_size` zero bytes in readable, executable
    /// segments. Runs may span adjacent segments.
    pub fn erase_zeros(&mut self, min_size: u64) {
        let min_size = min_size.max(1);
        let mut runs: Vec<AddressInterval> = Vec::new();
        let mut run: Option<AddressInterval> = None;
        let mut flush = |run: &mut Option<AddressInterval>| {
            if let Some(r) = run.take() {
                if r.size() >= min_size {
                    runs.push(r);
                }
            }
        };
        let mut buf = vec![0u8; SCAN_CHUNK];
        for (range, segment) in self.segments.iter() {
            let contiguous = run.map_or(false, |r| r.is_left_adjacent(range));
            if !contiguous || !segment.perms().contains(Protection::RX) {
                flush(&mut run);
            }
            if !segment.perms().contains(Protection::RX) {
                continue;
            }
            let buffer = segment.buffer().borrow();
            let offset = segment.buffer_offset();
            if buffer.is_zero() && buffer.available(offset, usize::MAX) as u64 >= range.size() {
                run = Some(run.map_or(*range, |r| r.join(range)));
                continue;
            }
            let mut va = range.least();
            loop {
                let left = range.greatest() - va;
                let want = if left >= (buf.len() - 1) as u64 {
                    buf.len()
                } else {
                    left as usize + 1
                };
                let got = buffer.read(&mut buf[..want], segment.buffer_offset_at(range, va));
                for (i, &b) in buf[..got].iter().enumerate() {
                    let at = va + i as u64;
                    if b == 0 {
                        run = Some(run.map_or(AddressInterval::at(at), |r| {
                            r.join(&AddressInterval::at(at))
                        }));
                    } else {
                        flush(&mut run);
                    }
                }
                if got < want {
                    flush(&mut run);
                    break;
                }
                if left < want as u64 {
                    break;
                }
                va += want as u64;
            }
        }
        flush(&mut run);
        drop(flush);
        debug!(min_size, runs = runs.len(), "Erasing zero runs");
        for r in runs {
            self.segments.erase(r);
        }
    }
}
