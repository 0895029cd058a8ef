//! # heap — a break-backed, segregated free-list allocator
//!
//! A dynamic memory allocator in the `malloc`/`free`/`calloc`/`realloc`
//! mould. Memory comes from the OS in fenceposted *chunks* (one program
//! break extension each); every byte of every chunk belongs to exactly one
//! boundary-tagged *block*; free blocks are filed in 59 segregated lists —
//! 58 exact size classes plus one address-ordered list for everything
//! larger.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              C ABI / global instance                │
//! │   allocate · deallocate · callocate · reallocate    │
//! │   one heap mutex held across each whole call        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │               Engine ([`Heap`])                     │
//! │   size rounding · class search · tail splitting     │
//! │   bidirectional coalescing · free-list filing       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Chunks ([`ChunkSource`])                   │
//! │   arena-sized break extensions · fenceposts         │
//! │   fusion of contiguous chunks · 1024-entry table    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Allocation path
//!
//! A request for `n` bytes becomes a block footprint of
//! `max(32, round_up_8(n + 16))` bytes. The free lists are searched from
//! the footprint's class upward; the match is carved from its **tail**
//! when a viable remainder would survive, so the remainder keeps its base
//! address and the variable-size list keeps its order. On a miss the heap
//! grows one 4096-byte arena at a time — contiguous extensions fuse with
//! the previous chunk by demoting the fencepost between them — until the
//! request fits.
//!
//! The free path validates the pointer, flips the block to unallocated,
//! absorbs whichever physical neighbours are free (fenceposts stop the
//! merge at chunk edges), and files the result by its final size.
//!
//! ## Concurrency
//!
//! All heap state sits behind one process-global spin mutex; the
//! linearisation order of allocation events is the lock-acquisition
//! order. The lock spans entire operations, growth included, and is
//! released on every exit path. The allocator is not async-signal-safe.
//!
//! ## Diagnostics
//!
//! [`verify_heap`] walks every chunk and every list and reports the first
//! broken invariant; [`dump_heap`] logs the block map through `log`, in
//! ANSI colour when `MALLOC_DEBUG_COLOR=1337_CoLoRs`. Double frees and
//! foreign pointers abort with a diagnostic: corrupted heap state is not
//! recoverable.
//!
//! ## Embedding
//!
//! The engine is generic over its [`ChunkSource`]. The global instance
//! uses [`Sbrk`]; [`FixedRegion`] runs a heap over caller-provided memory
//! instead (that is also how the test suite stays hermetic). Alignment
//! stops at 8 bytes by design, so this crate deliberately does not
//! implement `GlobalAlloc`.

#![allow(
    unsafe_code,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

/// Log the diagnostic, then abort the operation by panicking; the shipped
/// profiles turn the panic into a process abort.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*);
    }};
}
pub(crate) use fatal;

mod chunk;
pub mod debug;
mod free_list;
mod heap;

pub use chunk::{ARENA_SIZE, ChunkSource, ChunkSpan, FixedRegion, MAX_CHUNKS};
pub use debug::{BlockView, IntegrityError};
pub use free_list::{N_LISTS, list_index};
pub use heap::{Heap, HeapError};
pub use heap_blocks::{
    ALIGNMENT, BlockState, FENCEPOST_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE, round_up,
};

#[cfg(unix)]
pub use chunk::Sbrk;

#[cfg(unix)]
use heap_sync::HeapMutex;
#[cfg(unix)]
use std::sync::OnceLock;

/// The process-global heap, created race-free on first use. A `static`
/// never moves and the break belongs to it alone from then on.
#[cfg(unix)]
static GLOBAL: OnceLock<HeapMutex<Heap<Sbrk>>> = OnceLock::new();

#[cfg(unix)]
fn global() -> &'static HeapMutex<Heap<Sbrk>> {
    GLOBAL.get_or_init(|| HeapMutex::new(Heap::new(Sbrk::new())))
}

/// C-ABI allocation entry point: at least `size` usable bytes, 8-aligned,
/// or null when `size` is zero or memory is exhausted.
#[cfg(unix)]
#[unsafe(no_mangle)]
pub extern "C" fn allocate(size: usize) -> *mut u8 {
    global().with_lock(|heap| heap.request(size))
}

/// C-ABI free entry point. Null is accepted and ignored.
///
/// # Safety
/// `ptr` must be null or a pointer returned by [`allocate`],
/// [`callocate`] or [`reallocate`] that has not been passed here since.
#[cfg(unix)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn deallocate(ptr: *mut u8) {
    global().with_lock(|heap| heap.release(ptr));
}

/// C-ABI zeroed-array entry point: `count * size` zero bytes, or null on
/// overflow, zero total, or exhaustion.
#[cfg(unix)]
#[unsafe(no_mangle)]
pub extern "C" fn callocate(count: usize, size: usize) -> *mut u8 {
    global().with_lock(|heap| heap.request_zeroed(count, size))
}

/// C-ABI reallocation entry point: null `ptr` allocates, `size == 0`
/// frees and returns null, anything else moves the data to a fresh block
/// (the old block survives if allocation fails).
///
/// # Safety
/// `ptr` must be null or a live pointer produced by this allocator.
#[cfg(unix)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reallocate(ptr: *mut u8, size: usize) -> *mut u8 {
    global().with_lock(|heap| heap.resize(ptr, size))
}

/// Run the integrity walk over the global heap, under its lock.
///
/// # Panics
/// Aborts with a diagnostic naming the first broken invariant; a
/// corrupted heap cannot be repaired.
#[cfg(unix)]
pub fn verify_heap() {
    global().with_lock(|heap| {
        if let Err(err) = debug::verify(heap) {
            fatal!("heap corruption: {err}");
        }
    });
}

/// Log the global heap's block map, under its lock.
#[cfg(unix)]
pub fn dump_heap() {
    global().with_lock(|heap| debug::dump(heap));
}
