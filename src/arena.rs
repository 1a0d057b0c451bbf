// Fixed-pool arena allocator.
//
// Handles are byte offsets rather than pointers, so they stay meaningful
// even if the backing buffer is ever moved to shared memory and handed
// out across worker processes instead of threads in one process.

use parking_lot::Mutex;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A relocatable handle into the arena: a byte offset, never a pointer.
///
/// Offset zero is reserved as a null sentinel, so `Option<ArenaHandle>` is
/// niche-optimized to the same size as a bare `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaHandle(NonZeroU32);

impl ArenaHandle {
    fn from_offset(offset: u32) -> Self {
        Self(NonZeroU32::new(offset + 1).expect("offset + 1 is never zero"))
    }

    fn offset(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct FreeBlock {
    offset: u32,
    len: u32,
}

/// Fixed-capacity byte pool with a coalescing free list.
///
/// `allocate` never panics on exhaustion: it returns `None`, which callers
/// treat as "not cached" rather than an error.
pub struct Arena {
    capacity: u32,
    // Guards the buffer and free list together; allocation and free are
    // both short, non-blocking operations so a single lock is adequate.
    inner: Mutex<ArenaInner>,
    alloced_size: AtomicUsize,
}

struct ArenaInner {
    buffer: Vec<u8>,
    // Free blocks kept sorted by offset so adjacent blocks can be merged
    // on free without a second pass.
    free_list: Vec<FreeBlock>,
}

impl Arena {
    pub fn new(capacity_bytes: u32) -> Self {
        Self {
            capacity: capacity_bytes,
            inner: Mutex::new(ArenaInner {
                buffer: vec![0u8; capacity_bytes as usize],
                free_list: vec![FreeBlock {
                    offset: 0,
                    len: capacity_bytes,
                }],
            }),
            alloced_size: AtomicUsize::new(0),
        }
    }

    /// Total pool capacity in bytes.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bytes currently attributed to live allocations.
    pub fn alloced_size(&self) -> usize {
        self.alloced_size.load(Ordering::Relaxed)
    }

    /// Allocate `len` bytes, returning `None` on exhaustion or
    /// fragmentation failure. Never panics, never blocks indefinitely.
    pub fn allocate(&self, len: u32) -> Option<ArenaHandle> {
        if len == 0 || len > self.capacity {
            return None;
        }
        let mut inner = self.inner.lock();
        let slot = inner
            .free_list
            .iter()
            .position(|b| b.len >= len)
            .map(|i| inner.free_list[i]);
        let block = slot?;
        let idx = inner
            .free_list
            .iter()
            .position(|b| b.offset == block.offset)
            .expect("block just found above");
        if block.len == len {
            inner.free_list.remove(idx);
        } else {
            inner.free_list[idx] = FreeBlock {
                offset: block.offset + len,
                len: block.len - len,
            };
        }
        self.alloced_size.fetch_add(len as usize, Ordering::Relaxed);
        Some(ArenaHandle::from_offset(block.offset))
    }

    /// Copy `data` into a freshly allocated block, or return `None` on
    /// exhaustion. Callers serialize outside any store lock, then land the
    /// bytes here.
    pub fn allocate_copy(&self, data: &[u8]) -> Option<ArenaHandle> {
        let handle = self.allocate(data.len() as u32)?;
        let mut inner = self.inner.lock();
        let offset = handle.offset();
        inner.buffer[offset..offset + data.len()].copy_from_slice(data);
        Some(handle)
    }

    /// Free `len` bytes at `handle`. The caller must pass the same `len`
    /// it allocated with; there is no way to recover `len` from the handle
    /// alone, which keeps the arena itself ignorant of entry shapes.
    pub fn free(&self, handle: ArenaHandle, len: u32) {
        if len == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        let offset = handle.offset() as u32;
        let idx = inner
            .free_list
            .partition_point(|b| b.offset < offset);
        inner.free_list.insert(idx, FreeBlock { offset, len });
        Self::coalesce_around(&mut inner.free_list, idx);
        self.alloced_size.fetch_sub(len as usize, Ordering::Relaxed);
    }

    /// Read out a copy of the bytes at `handle`/`len`.
    pub fn resolve(&self, handle: ArenaHandle, len: u32) -> Vec<u8> {
        let inner = self.inner.lock();
        let offset = handle.offset();
        inner.buffer[offset..offset + len as usize].to_vec()
    }

    fn coalesce_around(list: &mut Vec<FreeBlock>, idx: usize) {
        if idx + 1 < list.len() {
            let cur = list[idx];
            let next = list[idx + 1];
            if cur.offset + cur.len == next.offset {
                list[idx].len += next.len;
                list.remove(idx + 1);
            }
        }
        if idx > 0 {
            let prev = list[idx - 1];
            let cur = list[idx];
            if prev.offset + prev.len == cur.offset {
                list[idx - 1].len += cur.len;
                list.remove(idx);
            }
        }
    }
}
