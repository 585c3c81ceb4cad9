//! Storage behind memory segments.
//!
//! A `Buffer` is a fixed-size byte container addressed by offsets that are
//! independent of any virtual address. Buffers come in a closed set of kinds
//! (see `BufferKind`) and are shared between segments, and between maps,
//! through the reference-counted `BufferPtr` handle.

use crate::io::error::Result as IoResult;
use crate::io::{self, IOLimits, MapMode, MappedFile};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NAME: AtomicU64 = AtomicU64::new(0);

/// Generates short debug names: "aaa", "aab", ... "zzz", then wraps.
fn next_name() -> String {
    let mut n = NEXT_NAME.fetch_add(1, Ordering::Relaxed) % (26 * 26 * 26);
    let mut name = [b'a'; 3];
    for slot in name.iter_mut().rev() {
        *slot = b'a' + (n % 26) as u8;
        n /= 26;
    }
    name.iter().map(|&b| b as char).collect()
}

/// The kind of storage a buffer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// No storage; reserves address space only. Reads and writes transfer nothing.
    Null,
    /// Caller-owned memory that the buffer neither copies nor frees.
    Extern,
    /// Privately owned heap storage.
    Heap,
    /// A memory-mapped file.
    Mmap,
    /// Zero-filled storage allocated on the first non-zero write.
    Anonymous,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BufferKind::Null => "null",
            BufferKind::Extern => "extern",
            BufferKind::Heap => "heap",
            BufferKind::Mmap => "mmap",
            BufferKind::Anonymous => "anonymous",
        };
        f.write_str(s)
    }
}

enum Storage {
    Null { size: usize },
    Extern { ptr: NonNull<u8>, len: usize, mutable: bool },
    Heap(Vec<u8>),
    Mmap(MappedFile),
    Anonymous { size: usize, data: Option<Vec<u8>> },
}

/// Fixed-size byte storage for one or more segments.
pub struct Buffer {
    name: String,
    read_only: bool,
    storage: Storage,
}

impl Buffer {
    fn with_storage(storage: Storage) -> Self {
        Self {
            name: next_name(),
            read_only: false,
            storage,
        }
    }

    /// A buffer with no data. All reads and writes transfer zero bytes.
    pub fn null(size: usize) -> Self {
        Self::with_storage(Storage::Null { size })
    }

    /// Wraps caller-owned memory without copying it.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// the buffer, or any clone of its `BufferPtr`, exists, and the memory must
    /// not be accessed through other references while the buffer is in use.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self::with_storage(Storage::Extern {
            ptr,
            len,
            mutable: true,
        })
    }

    /// Wraps constant data. The buffer is read-only.
    pub fn from_static(data: &'static [u8]) -> Self {
        // Never written through: `mutable: false` outlives any read-only flag change.
        let ptr = NonNull::from(data).cast::<u8>();
        let mut buf = Self::with_storage(Storage::Extern {
            ptr,
            len: data.len(),
            mutable: false,
        });
        buf.read_only = true;
        buf
    }

    /// Wraps mutable data that lives for the rest of the program.
    pub fn from_static_mut(data: &'static mut [u8]) -> Self {
        let len = data.len();
        let ptr = NonNull::from(data).cast::<u8>();
        Self::with_storage(Storage::Extern {
            ptr,
            len,
            mutable: true,
        })
    }

    /// A zero-initialised heap buffer.
    pub fn heap(size: usize) -> Self {
        Self::with_storage(Storage::Heap(vec![0; size]))
    }

    /// A heap buffer that takes ownership of `data`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::with_storage(Storage::Heap(data))
    }

    /// A heap buffer holding the contents of a file from `start_offset` to its end.
    pub fn heap_from_file<P: AsRef<Path>>(
        path: P,
        start_offset: u64,
        limits: &IOLimits,
    ) -> IoResult<Self> {
        Ok(Self::from_vec(io::read_file_from(path, start_offset, limits)?))
    }

    /// Maps an entire file. Read-only mappings produce a read-only buffer.
    pub fn mmap_file<P: AsRef<Path>>(path: P, mode: MapMode, limits: &IOLimits) -> IoResult<Self> {
        let mapped = io::map_file(path, mode, limits)?;
        Ok(Self::from_mapping(mapped, mode))
    }

    /// Maps `len` bytes of an open file starting at `offset`.
    pub fn mmap_range(file: &File, offset: u64, len: usize, mode: MapMode) -> IoResult<Self> {
        let mapped = io::map_file_range(file, offset, len, mode)?;
        Ok(Self::from_mapping(mapped, mode))
    }

    fn from_mapping(mapped: MappedFile, mode: MapMode) -> Self {
        let mut buf = Self::with_storage(Storage::Mmap(mapped));
        buf.read_only = !mode.is_writable();
        buf
    }

    /// A buffer that reads as all zero and allocates on the first non-zero write.
    pub fn anonymous(size: usize) -> Self {
        Self::with_storage(Storage::Anonymous { size, data: None })
    }

    /// Moves the buffer behind a shared handle.
    pub fn into_ptr(self) -> BufferPtr {
        BufferPtr(Rc::new(RefCell::new(self)))
    }

    pub fn kind(&self) -> BufferKind {
        match self.storage {
            Storage::Null { .. } => BufferKind::Null,
            Storage::Extern { .. } => BufferKind::Extern,
            Storage::Heap(_) => BufferKind::Heap,
            Storage::Mmap(_) => BufferKind::Mmap,
            Storage::Anonymous { .. } => BufferKind::Anonymous,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Whether the storage refuses writes. This is independent of the
    /// permissions of any segment pointing at the buffer.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn size(&self) -> usize {
        match &self.storage {
            Storage::Null { size } => *size,
            Storage::Extern { len, .. } => *len,
            Storage::Heap(v) => v.len(),
            Storage::Mmap(m) => m.len(),
            Storage::Anonymous { size, .. } => *size,
        }
    }

    /// Changes the buffer size.
    ///
    /// # Panics
    ///
    /// File mappings cannot be resized, and caller-owned memory cannot grow.
    pub fn resize(&mut self, new_size: usize) {
        match &mut self.storage {
            Storage::Null { size } => *size = new_size,
            Storage::Extern { len, .. } => {
                assert!(
                    new_size <= *len,
                    "cannot grow caller-owned buffer {} from {} to {} bytes",
                    self.name,
                    len,
                    new_size
                );
                *len = new_size;
            }
            Storage::Heap(v) => v.resize(new_size, 0),
            Storage::Mmap(_) => panic!("file-mapped buffer {} cannot be resized", self.name),
            Storage::Anonymous { size, data } => {
                *size = new_size;
                if let Some(v) = data {
                    v.resize(new_size, 0);
                }
            }
        }
    }

    /// The stored bytes, when the storage is materialised.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Null { .. } => None,
            // Safety: the constructors require `ptr` to be valid for `len` bytes.
            Storage::Extern { ptr, len, .. } => {
                Some(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), *len) })
            }
            Storage::Heap(v) => Some(v),
            Storage::Mmap(m) => Some(m.as_slice()),
            Storage::Anonymous { data, .. } => data.as_deref(),
        }
    }

    fn data_mut(&mut self) -> Option<&mut [u8]> {
        if self.read_only {
            return None;
        }
        match &mut self.storage {
            Storage::Null { .. } => None,
            // Safety: the constructors require `ptr` to be valid and exclusively ours.
            Storage::Extern {
                ptr,
                len,
                mutable: true,
            } => Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), *len) }),
            Storage::Extern { .. } => None,
            Storage::Heap(v) => Some(v),
            Storage::Mmap(m) => m.as_mut_slice(),
            Storage::Anonymous { size, data } => {
                Some(data.get_or_insert_with(|| vec![0; *size]).as_mut_slice())
            }
        }
    }

    fn clip(&self, offset: u64, nbytes: usize) -> usize {
        let size = self.size() as u64;
        if offset >= size {
            return 0;
        }
        nbytes.min((size - offset) as usize)
    }

    /// Number of bytes a read of `nbytes` at `offset` would copy.
    pub fn available(&self, offset: u64, nbytes: usize) -> usize {
        match self.storage {
            Storage::Null { .. } => 0,
            _ => self.clip(offset, nbytes),
        }
    }

    /// Copies bytes starting at `offset` into `dst`. Returns the number copied;
    /// the rest of `dst` is left untouched.
    pub fn read(&self, dst: &mut [u8], offset: u64) -> usize {
        let n = self.available(offset, dst.len());
        if n == 0 {
            return 0;
        }
        let start = offset as usize;
        match self.data() {
            Some(data) => dst[..n].copy_from_slice(&data[start..start + n]),
            // Unallocated anonymous storage reads as zero.
            None => dst[..n].fill(0),
        }
        n
    }

    /// Number of bytes a write of `nbytes` at `offset` would store.
    pub fn writable(&self, offset: u64, nbytes: usize) -> usize {
        if self.read_only {
            return 0;
        }
        match &self.storage {
            Storage::Null { .. } => 0,
            Storage::Extern { mutable: false, .. } => 0,
            Storage::Mmap(MappedFile::ReadOnly(_)) => 0,
            _ => self.clip(offset, nbytes),
        }
    }

    /// Copies `src` into the buffer at `offset`. Returns the number of bytes
    /// stored, which is short only when the buffer cannot hold or accept them.
    pub fn write(&mut self, src: &[u8], offset: u64) -> usize {
        let n = self.writable(offset, src.len());
        if n == 0 {
            return 0;
        }
        if let Storage::Anonymous { data: None, .. } = self.storage {
            if src[..n].iter().all(|&b| b == 0) {
                return n;
            }
        }
        let start = offset as usize;
        match self.data_mut() {
            Some(data) => {
                data[start..start + n].copy_from_slice(&src[..n]);
                n
            }
            None => 0,
        }
    }

    /// True if every byte is zero.
    pub fn is_zero(&self) -> bool {
        match self.data() {
            Some(data) => data.iter().all(|&b| b == 0),
            None => true,
        }
    }

    /// An independent copy of the data. Storage that cannot be privately
    /// duplicated (caller-owned, file-mapped) becomes a heap buffer.
    pub fn clone_buffer(&self) -> Buffer {
        let storage = match &self.storage {
            Storage::Null { size } => Storage::Null { size: *size },
            Storage::Anonymous { size, data } => Storage::Anonymous {
                size: *size,
                data: data.clone(),
            },
            _ => Storage::Heap(self.data().map(<[u8]>::to_vec).unwrap_or_default()),
        };
        Self::with_storage(storage)
    }

    /// Writes the entire buffer to `path`, creating or truncating it.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        match (&self.storage, self.data()) {
            (_, Some(data)) => std::fs::write(path, data),
            (Storage::Anonymous { size, .. }, None) => std::fs::write(path, vec![0u8; *size]),
            _ => std::fs::write(path, []),
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("size", &self.size())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Shared handle to a `Buffer`.
///
/// Every segment referencing a buffer holds one of these; the buffer is
/// released when the last handle is dropped. Handles are single-threaded.
#[derive(Clone)]
pub struct BufferPtr(Rc<RefCell<Buffer>>);

impl BufferPtr {
    pub fn new(buffer: Buffer) -> Self {
        buffer.into_ptr()
    }

    /// True if both handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &BufferPtr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the shared buffer, stable while any handle is alive.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Number of handles sharing this buffer.
    pub fn holders(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn borrow(&self) -> Ref<'_, Buffer> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Buffer> {
        self.0.borrow_mut()
    }

    pub fn size(&self) -> usize {
        self.borrow().size()
    }

    pub fn name(&self) -> String {
        self.borrow().name().to_string()
    }

    pub fn kind(&self) -> BufferKind {
        self.borrow().kind()
    }

    /// A new handle to an independent copy of the buffer's data.
    pub fn deep_clone(&self) -> BufferPtr {
        self.borrow().clone_buffer().into_ptr()
    }
}

impl From<Buffer> for BufferPtr {
    fn from(buffer: Buffer) -> Self {
        buffer.into_ptr()
    }
}

impl fmt::Debug for BufferPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.borrow().fmt(f)
    }
}
