//! The allocator engine: size rounding, class search, tail splitting,
//! bidirectional coalescing and growth.

use crate::chunk::{
    ARENA_SIZE, ChunkSource, ChunkSpan, ChunkTable, install_chunk, install_right_fencepost,
};
use crate::debug::{self, BlockView, IntegrityError};
use crate::fatal;
use crate::free_list::{FreeListSet, list_index};
use core::ptr;
use heap_blocks::{ALIGNMENT, BlockPtr, BlockState, FENCEPOST_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE};

/// The heap engine, generic over its [`ChunkSource`].
///
/// One of these owns every block of every chunk it has acquired. It is a
/// single-threaded state machine: thread safety comes from the process
/// global in the crate root, which wraps the engine in the heap mutex and
/// holds it across each whole operation.
///
/// The public operations mirror the C surface: [`request`](Self::request)
/// / [`release`](Self::release) / [`request_zeroed`](Self::request_zeroed)
/// / [`resize`](Self::resize).
pub struct Heap<S: ChunkSource> {
    pub(crate) lists: FreeListSet,
    pub(crate) chunks: ChunkTable,
    source: S,
}

// Safety: the engine's raw pointers are only dereferenced through `&mut
// self`, and the global instance is only reached through the heap mutex.
unsafe impl<S: ChunkSource + Send> Send for Heap<S> {}

impl<S: ChunkSource> Heap<S> {
    /// An empty heap over `source`; the first request acquires the first
    /// chunk.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            lists: FreeListSet::new(),
            chunks: ChunkTable::new(),
            source,
        }
    }

    /// Allocate at least `n` usable bytes, 8-aligned, valid until passed
    /// to [`release`](Self::release). Returns null when `n` is zero or
    /// memory is exhausted.
    pub fn request(&mut self, n: usize) -> *mut u8 {
        if n == 0 {
            return ptr::null_mut();
        }
        let Some(alloc_size) = footprint(n) else {
            return ptr::null_mut();
        };
        let index = list_index(alloc_size);
        // Safety: block handles come from our own lists and chunks, and
        // `&mut self` serialises every header access.
        unsafe {
            if let Some(block) = self.lists.find_fit(index, alloc_size) {
                return self.carve(block, alloc_size);
            }
            if self.grow(alloc_size).is_err() {
                return ptr::null_mut();
            }
            // Growth only returns once a fitting block is listed.
            match self.lists.find_fit(index, alloc_size) {
                Some(block) => self.carve(block, alloc_size),
                None => ptr::null_mut(),
            }
        }
    }

    /// Return a pointer previously produced by [`request`](Self::request).
    /// Null is a no-op.
    ///
    /// # Panics
    /// Aborts with a diagnostic on pointers the heap never handed out and
    /// on double frees.
    pub fn release(&mut self, ptr: *mut u8) {
        let Some(block) = BlockPtr::from_user_ptr(ptr) else {
            return;
        };
        self.ensure_ours(block);
        // Safety: the block was validated to lie inside a tracked chunk,
        // and `&mut self` serialises every header access.
        unsafe {
            if block.state() != BlockState::Allocated {
                fatal!("double free of {ptr:p}");
            }
            block.set_state(BlockState::Unallocated);

            // Absorb the right neighbour first so the left merge below
            // sees the final size.
            let mut block = block;
            let right = block.right();
            if right.state() == BlockState::Unallocated {
                self.lists.unlink(right);
                block.set_size(block.size() + right.size());
            }
            block.right().set_left_size(block.size());

            // A real block always has a left neighbour, the left fencepost
            // at minimum; fenceposts fail the state test and stop the
            // merge at the chunk edge.
            let left = block.left();
            if left.state() == BlockState::Unallocated {
                self.lists.unlink(left);
                left.set_size(left.size() + block.size());
                left.right().set_left_size(left.size());
                block = left;
            }

            self.lists.insert(block);
        }
    }

    /// Allocate a zeroed array of `count` elements of `size` bytes.
    /// Returns null on multiplication overflow, zero total, or exhaustion.
    pub fn request_zeroed(&mut self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            return ptr::null_mut();
        };
        let ptr = self.request(total);
        if !ptr.is_null() {
            // Safety: `request` returned at least `total` writable bytes.
            unsafe {
                ptr.write_bytes(0, total);
            }
        }
        ptr
    }

    /// Reallocate: null behaves as [`request`](Self::request), `n == 0`
    /// as [`release`](Self::release) returning null. Otherwise the data
    /// moves to a fresh block; on exhaustion the old block is left intact
    /// and null is returned. No in-place resizing is attempted.
    ///
    /// # Panics
    /// Aborts with a diagnostic on pointers the heap never handed out.
    pub fn resize(&mut self, ptr: *mut u8, n: usize) -> *mut u8 {
        let Some(block) = BlockPtr::from_user_ptr(ptr) else {
            return self.request(n);
        };
        if n == 0 {
            self.release(ptr);
            return core::ptr::null_mut();
        }
        self.ensure_ours(block);
        let fresh = self.request(n);
        if fresh.is_null() {
            return core::ptr::null_mut();
        }
        // Safety: both payloads are live and distinct; the copy length is
        // bounded by the smaller of the two.
        unsafe {
            let old_payload = block.size() - HEADER_SIZE;
            ptr::copy_nonoverlapping(ptr, fresh, old_payload.min(n));
        }
        self.release(ptr);
        fresh
    }

    /// Run the integrity walk over every chunk and every free list.
    ///
    /// # Errors
    /// The first broken invariant found, if any.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        debug::verify(self)
    }

    /// Snapshot of every block in address order, fenceposts included.
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockView> {
        debug::blocks(self)
    }

    /// Extents of the chunks acquired so far.
    #[must_use]
    pub fn chunk_spans(&self) -> Vec<ChunkSpan> {
        self.chunks.spans().to_vec()
    }

    /// Hand out the requested tail of `block`, splitting off a surviving
    /// remainder when one of at least [`MIN_BLOCK_SIZE`] bytes would
    /// remain.
    ///
    /// # Safety
    /// `block` must be a listed unallocated block of at least
    /// `alloc_size` bytes.
    unsafe fn carve(&mut self, block: BlockPtr, alloc_size: usize) -> *mut u8 {
        unsafe {
            let found_size = block.size();
            if found_size - alloc_size >= MIN_BLOCK_SIZE {
                // Tail split: the remainder keeps its base address, so the
                // address order of the variable-size list is undisturbed
                // and the remainder only moves lists when its class
                // changes.
                let remainder_size = found_size - alloc_size;
                block.set_size(remainder_size);

                let carved = block.right();
                carved.write(alloc_size, BlockState::Allocated, remainder_size);
                carved.right().set_left_size(alloc_size);

                if list_index(remainder_size) != list_index(found_size) {
                    self.lists.unlink(block);
                    self.lists.insert(block);
                }
                carved.user_ptr()
            } else {
                self.lists.unlink(block);
                block.set_state(BlockState::Allocated);
                block.user_ptr()
            }
        }
    }

    /// Extend the backing region, an arena at a time, until a free block
    /// can hold `need` bytes. Every produced block is listed; on failure
    /// the blocks acquired so far simply stay available.
    fn grow(&mut self, need: usize) -> Result<(), HeapError> {
        loop {
            let block = self.extend_arena()?;
            // Safety: `extend_arena` returns a fresh unlisted block.
            let size = unsafe { block.size() };
            unsafe {
                self.lists.insert(block);
            }
            if size >= need {
                return Ok(());
            }
        }
    }

    /// One extension of [`ARENA_SIZE`] bytes: install a fresh fenceposted
    /// chunk, or fuse with the previous chunk when the break turns out to
    /// be contiguous with it.
    fn extend_arena(&mut self) -> Result<BlockPtr, HeapError> {
        let previous_end = self.chunks.last_end();
        let base = self
            .source
            .extend(ARENA_SIZE)
            .ok_or(HeapError::OutOfMemory)?;
        let base_addr = base.as_ptr() as usize;
        debug_assert!(base_addr.is_multiple_of(ALIGNMENT));

        if previous_end == Some(base_addr) {
            // Contiguous with the last chunk: the joining fencepost is
            // demoted into ordinary space and only the new right fencepost
            // is installed. No table entry is spent.
            // Safety: the demoted fencepost and its neighbours belong to
            // the tracked previous chunk; the fresh region is ours.
            unsafe {
                let fence = BlockPtr::from_addr(base_addr - FENCEPOST_SIZE);
                debug_assert_eq!(fence.state(), BlockState::Fencepost);
                let left = fence.left();
                let block = if left.state() == BlockState::Unallocated {
                    self.lists.unlink(left);
                    left.set_size(left.size() + ARENA_SIZE);
                    left
                } else {
                    fence.write(ARENA_SIZE, BlockState::Unallocated, fence.left_size());
                    fence
                };
                install_right_fencepost(base_addr + ARENA_SIZE - FENCEPOST_SIZE, block.size());
                self.chunks.grow_last(ARENA_SIZE);
                Ok(block)
            }
        } else {
            if self.chunks.is_full() {
                // The region just obtained cannot be tracked; it stays
                // behind the break, untouched and unreachable.
                return Err(HeapError::ChunkTableFull);
            }
            // Safety: the fresh region is writable and exclusively ours.
            let inner = unsafe { install_chunk(base_addr, ARENA_SIZE) };
            self.chunks.push(ChunkSpan {
                base: base_addr,
                end: base_addr + ARENA_SIZE,
            });
            Ok(inner)
        }
    }

    /// Best-effort guard in front of the free path: a header address the
    /// chunk table does not cover can only come from a pointer the heap
    /// never produced.
    fn ensure_ours(&self, block: BlockPtr) {
        let addr = block.addr();
        if !addr.is_multiple_of(ALIGNMENT) || !self.chunks.covers_block(addr) {
            fatal!("pointer {addr:#x} was not produced by this heap");
        }
    }
}

/// Total block footprint needed to serve a request of `n` user bytes:
/// header plus payload, rounded up to the 8-byte granule, floored at the
/// smallest block a later free can still link into a list.
const fn footprint(n: usize) -> Option<usize> {
    let Some(padded) = n.checked_add(HEADER_SIZE + (ALIGNMENT - 1)) else {
        return None;
    };
    let size = padded & !(ALIGNMENT - 1);
    if size < MIN_BLOCK_SIZE {
        Some(MIN_BLOCK_SIZE)
    } else {
        Some(size)
    }
}

/// Why the heap could not grow. Both cases surface as a null pointer from
/// the public operations.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    /// The chunk source refused to extend the backing region.
    #[error("out of memory")]
    OutOfMemory,
    /// All 1024 chunk-table entries are in use and the fresh region was
    /// not contiguous with the last chunk.
    #[error("chunk table full")]
    ChunkTableFull,
}
