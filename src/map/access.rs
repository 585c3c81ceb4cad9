//! Reading and writing through a memory map.
//!
//! Transfers walk the address space from segment to segment and stop at the
//! first address that is unmapped, lacks the required permissions, or whose
//! buffer cannot supply (or accept) the byte. The `*_count` variants report
//! how much a transfer would move without touching any data.

use tracing::{debug, trace};

use crate::core::address_interval::AddressInterval;
use crate::core::buffer::BufferKind;
use crate::core::segment::{Protection, Segment};
use crate::error::{MapError, Result};
use crate::map::MemoryMap;

/// Bytes of `range` from `va` to its end, capped at `remaining`.
fn span_len(range: &AddressInterval, va: u64, remaining: usize) -> usize {
    let span = range.greatest() - va;
    if span >= (remaining as u64).saturating_sub(1) {
        remaining
    } else {
        span as usize + 1
    }
}

/// Bytes a write through `segment` at `offset` would store, counting a
/// pending copy-on-write as writable.
fn writable_through(segment: &Segment, offset: u64, n: usize) -> usize {
    let buffer = segment.buffer().borrow();
    if segment.is_cow() && buffer.kind() != BufferKind::Null {
        buffer.available(offset, n)
    } else {
        buffer.writable(offset, n)
    }
}

impl MemoryMap {
    /// Copies bytes starting at `va` into `dst`, crossing segment boundaries.
    /// Returns the number copied; the rest of `dst` is zero-filled.
    pub fn read(
        &self,
        dst: &mut [u8],
        va: u64,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        let desired = dst.len();
        let n = self.read_forward(Some(&mut *dst), va, desired, required, prohibited, false);
        dst[n..].fill(0);
        n
    }

    /// Like `read`, but never crosses out of the segment containing `va`.
    pub fn read1(
        &self,
        dst: &mut [u8],
        va: u64,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        let desired = dst.len();
        let n = self.read_forward(Some(&mut *dst), va, desired, required, prohibited, true);
        dst[n..].fill(0);
        n
    }

    /// Number of bytes `read` would copy for a destination of `desired` bytes.
    pub fn read_count(
        &self,
        va: u64,
        desired: usize,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        self.read_forward(None, va, desired, required, prohibited, false)
    }

    /// Number of bytes `read1` would copy for a destination of `desired` bytes.
    pub fn read1_count(
        &self,
        va: u64,
        desired: usize,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        self.read_forward(None, va, desired, required, prohibited, true)
    }

    /// Reads up to `desired` bytes into a new vector, truncated to what was read.
    pub fn read_vec(
        &self,
        va: u64,
        desired: usize,
        required: Protection,
        prohibited: Protection,
    ) -> Vec<u8> {
        let available = self.read_count(va, desired, required, prohibited);
        let mut data = vec![0u8; available];
        let n = self.read_forward(Some(&mut data[..]), va, available, required, prohibited, false);
        data.truncate(n);
        data
    }

    fn read_forward(
        &self,
        mut dst: Option<&mut [u8]>,
        start: u64,
        desired: usize,
        required: Protection,
        prohibited: Protection,
        single: bool,
    ) -> usize {
        let mut done = 0usize;
        while done < desired {
            let Some(va) = start.checked_add(done as u64) else {
                break;
            };
            let Some((range, segment)) = self.segments.find(va) else {
                break;
            };
            if !segment.perms().permits(required, prohibited) {
                break;
            }
            let want = span_len(range, va, desired - done);
            let offset = segment.buffer_offset_at(range, va);
            let buffer = segment.buffer().borrow();
            let got = match dst.as_deref_mut() {
                Some(dst) => buffer.read(&mut dst[done..done + want], offset),
                None => buffer.available(offset, want),
            };
            done += got;
            if got < want || single {
                break;
            }
        }
        done
    }

    /// Reads the bytes that end just below `end_va`, working downward.
    ///
    /// The count is determined first by scanning backward for mapped,
    /// permitted, readable bytes; those bytes then land at the start of
    /// `dst` in address order and the rest of `dst` is zero-filled.
    pub fn read_backward(
        &self,
        dst: &mut [u8],
        end_va: u64,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        self.read_backward_impl(dst, end_va, required, prohibited, false)
    }

    /// Like `read_backward`, but only from the segment containing `end_va - 1`.
    pub fn read_backward1(
        &self,
        dst: &mut [u8],
        end_va: u64,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        self.read_backward_impl(dst, end_va, required, prohibited, true)
    }

    /// Number of bytes `read_backward` would copy for `desired` bytes.
    pub fn read_backward_count(
        &self,
        end_va: u64,
        desired: usize,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        self.backward_extent(end_va, desired, required, prohibited, false)
    }

    /// Number of bytes `read_backward1` would copy for `desired` bytes.
    pub fn read_backward1_count(
        &self,
        end_va: u64,
        desired: usize,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        self.backward_extent(end_va, desired, required, prohibited, true)
    }

    fn read_backward_impl(
        &self,
        dst: &mut [u8],
        end_va: u64,
        required: Protection,
        prohibited: Protection,
        single: bool,
    ) -> usize {
        let n = self.backward_extent(end_va, dst.len(), required, prohibited, single);
        let start = end_va - n as u64;
        let copied = self.read_forward(Some(&mut dst[..n]), start, n, required, prohibited, false);
        debug_assert_eq!(copied, n);
        dst[copied..].fill(0);
        copied
    }

    fn backward_extent(
        &self,
        end_va: u64,
        desired: usize,
        required: Protection,
        prohibited: Protection,
        single: bool,
    ) -> usize {
        let mut n = 0usize;
        while n < desired {
            let Some(va) = end_va
                .checked_sub(n as u64)
                .and_then(|v| v.checked_sub(1))
            else {
                break;
            };
            let Some((range, segment)) = self.segments.find(va) else {
                break;
            };
            if !segment.perms().permits(required, prohibited) {
                break;
            }
            let below = va - range.least();
            let want = if below >= (desired - n - 1) as u64 {
                desired - n
            } else {
                below as usize + 1
            };
            let lo = va + 1 - want as u64;
            let offset = segment.buffer_offset_at(range, lo);
            if segment.buffer().borrow().available(offset, want) < want {
                break;
            }
            n += want;
            if single {
                break;
            }
        }
        n
    }

    /// Writes `src` starting at `va`, crossing segment boundaries. Returns the
    /// number of bytes stored. Bytes already stored before a short transfer
    /// stay written.
    pub fn write(
        &mut self,
        src: &[u8],
        va: u64,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        self.write_forward(src, va, required, prohibited, false)
    }

    /// Like `write`, but never crosses out of the segment containing `va`.
    pub fn write1(
        &mut self,
        src: &[u8],
        va: u64,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        self.write_forward(src, va, required, prohibited, true)
    }

    /// Number of bytes `write` would store for `desired` bytes.
    pub fn write_count(
        &self,
        va: u64,
        desired: usize,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        self.write_extent(va, desired, required, prohibited, false)
    }

    /// Number of bytes `write1` would store for `desired` bytes.
    pub fn write1_count(
        &self,
        va: u64,
        desired: usize,
        required: Protection,
        prohibited: Protection,
    ) -> usize {
        self.write_extent(va, desired, required, prohibited, true)
    }

    fn write_extent(
        &self,
        start: u64,
        desired: usize,
        required: Protection,
        prohibited: Protection,
        single: bool,
    ) -> usize {
        let mut done = 0usize;
        while done < desired {
            let Some(va) = start.checked_add(done as u64) else {
                break;
            };
            let Some((range, segment)) = self.segments.find(va) else {
                break;
            };
            if !segment.perms().permits(required, prohibited) {
                break;
            }
            let want = span_len(range, va, desired - done);
            let got = writable_through(segment, segment.buffer_offset_at(range, va), want);
            done += got;
            if got < want || single {
                break;
            }
        }
        done
    }

    fn write_forward(
        &mut self,
        src: &[u8],
        start: u64,
        required: Protection,
        prohibited: Protection,
        single: bool,
    ) -> usize {
        let mut done = 0usize;
        while done < src.len() {
            let Some(va) = start.checked_add(done as u64) else {
                break;
            };
            let cow = match self.segments.find(va) {
                Some((_, segment)) if segment.perms().permits(required, prohibited) => {
                    segment.is_cow()
                }
                _ => break,
            };
            if cow {
                self.unshare(va);
            }
            let Some((range, segment)) = self.segments.find(va) else {
                break;
            };
            let want = span_len(range, va, src.len() - done);
            let offset = segment.buffer_offset_at(range, va);
            let got = segment
                .buffer()
                .borrow_mut()
                .write(&src[done..done + want], offset);
            done += got;
            if got < want || single {
                break;
            }
        }
        trace!(va = start, requested = src.len(), written = done, "Write");
        done
    }

    /// Gives the copy-on-write segment at `va` a private buffer.
    ///
    /// Every segment of this map that shares the old buffer under
    /// copy-on-write moves to the same new copy, so the map stays internally
    /// consistent. When this map already holds every handle to a writable
    /// buffer no copy is made and the flags are simply cleared.
    pub(crate) fn unshare(&mut self, va: u64) {
        let Some((_, segment)) = self.segments.find(va) else {
            return;
        };
        if !segment.is_cow() {
            return;
        }
        let old = segment.buffer().clone();
        let local = self
            .segments
            .iter()
            .filter(|(_, s)| s.buffer().ptr_eq(&old))
            .count();
        // `old` itself accounts for one handle.
        let shared = old.holders() - 1 > local;
        // Storage that refuses writes is replaced even when nothing else holds it.
        let frozen = {
            let buffer = old.borrow();
            buffer.kind() != BufferKind::Null && buffer.writable(0, buffer.size()) < buffer.size()
        };
        let copied = shared || frozen;
        let replacement = copied.then(|| old.deep_clone());
        let mut moved = 0usize;
        for segment in self.segments.values_mut() {
            if segment.is_cow() && segment.buffer().ptr_eq(&old) {
                if let Some(fresh) = &replacement {
                    segment.set_buffer(fresh.clone());
                }
                segment.set_cow(false);
                moved += 1;
            }
        }
        debug!(
            va,
            buffer = %old.name(),
            copied,
            segments = moved,
            "Unshared copy-on-write buffer"
        );
    }

    /// Reads an unsigned integer of `width` bytes (at most eight) in the
    /// map's byte order. Any byte that cannot be read is an error.
    pub fn read_uint(&self, va: u64, width: usize) -> Result<u64> {
        let width = width.min(8);
        let mut bytes = [0u8; 8];
        let n = self.read(&mut bytes[..width], va, Protection::READ, Protection::empty());
        if n < width {
            return Err(MapError::NotMapped {
                map: self.summary(),
                va: va.wrapping_add(n as u64),
            });
        }
        Ok(self.byte_order().decode(&bytes[..width]))
    }

    /// Writes the low `width` bytes of `value` in the map's byte order.
    /// On a short write the stored prefix remains.
    pub fn write_uint(&mut self, va: u64, value: u64, width: usize) -> Result<()> {
        let bytes = self.byte_order().encode(value, width);
        let n = self.write(&bytes, va, Protection::WRITE, Protection::empty());
        if n < bytes.len() {
            return Err(MapError::NotMapped {
                map: self.summary(),
                va: va.wrapping_add(n as u64),
            });
        }
        Ok(())
    }
}
