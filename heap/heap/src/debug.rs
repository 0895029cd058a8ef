//! Heap diagnostics: the integrity walk and the block dump.
//!
//! Both walkers take the engine by shared reference and never mutate; the
//! public wrappers in the crate root run them under the global lock. The
//! walk is the executable form of the heap invariants: boundary tags
//! mirror their left neighbour, no two adjacent blocks are both free,
//! every free block sits on exactly one list at the index of its size,
//! and every chunk tiles its recorded extent exactly.

use crate::chunk::{ChunkSource, ChunkSpan};
use crate::free_list::{N_LISTS, list_index};
use crate::heap::Heap;
use heap_blocks::{BlockPtr, BlockState, FENCEPOST_SIZE, FreeLinks, MIN_BLOCK_SIZE};
use log::info;

/// Environment variable that switches the dump to ANSI colour.
pub const COLOR_ENV: &str = "MALLOC_DEBUG_COLOR";

/// The exact value [`COLOR_ENV`] must hold; anything else leaves colour
/// off.
pub const COLOR_SENTINEL: &str = "1337_CoLoRs";

const GREEN: &str = "\x1b[0;32m";
const BLUE: &str = "\x1b[0;34m";
const YELLOW: &str = "\x1b[0;33m";
const RESET: &str = "\x1b[0m";

/// Plain-data snapshot of one block, as reported by the walkers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockView {
    pub addr: usize,
    pub size: usize,
    pub left_size: usize,
    pub state: BlockState,
}

/// What the integrity walk can find wrong.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum IntegrityError {
    /// A header carries the tag value `3`, which is never written.
    #[error("illegal state tag at {addr:#x}")]
    IllegalTag { addr: usize },
    /// A size that is zero, unaligned, or runs past the chunk edge.
    #[error("implausible size {size} at {addr:#x}")]
    BadSize { addr: usize, size: usize },
    /// A block whose `left_size` does not mirror its left neighbour.
    #[error("boundary tag broken at {addr:#x}: left size {found}, neighbour is {expected}")]
    TagMismatch {
        addr: usize,
        found: usize,
        expected: usize,
    },
    /// Two physically adjacent blocks are both unallocated.
    #[error("uncoalesced free neighbours at {addr:#x}")]
    AdjacentFree { addr: usize },
    /// A chunk edge without its fencepost.
    #[error("missing fencepost at {addr:#x}")]
    MissingFencepost { addr: usize },
    /// A free list longer than the number of free blocks in existence.
    #[error("free list {index} is cyclic")]
    ListCycle { index: usize },
    /// A node whose neighbours do not point back at it.
    #[error("broken links at {addr:#x}")]
    BadLink { addr: usize },
    /// A listed block that is not unallocated.
    #[error("non-free block on a free list at {addr:#x}")]
    ListedNotFree { addr: usize },
    /// A block filed under a list that does not match its size.
    #[error("block at {addr:#x} misfiled under class {index}")]
    MisfiledBlock { addr: usize, index: usize },
    /// The variable-size list is not in ascending address order.
    #[error("address order violated at {addr:#x} on the variable-size list")]
    OutOfOrder { addr: usize },
    /// Lists and chunks disagree about how many free blocks exist, i.e.
    /// some free block is on no list or on more than one.
    #[error("{listed} listed free blocks, {walked} free blocks in chunks")]
    ListPopulation { listed: usize, walked: usize },
}

/// Walk every chunk and every free list, returning the first broken
/// invariant.
///
/// # Errors
/// See [`IntegrityError`].
pub fn verify<S: ChunkSource>(heap: &Heap<S>) -> Result<(), IntegrityError> {
    let mut free_blocks = 0_usize;

    for span in heap.chunks.spans() {
        free_blocks += verify_span(*span)?;
    }

    // Every unallocated block must be listed exactly once, at the right
    // index. Counting both sides and comparing catches unlisted and
    // doubly-listed blocks without any auxiliary storage.
    let mut listed = 0_usize;
    for index in 0..N_LISTS {
        let sentinel = heap.lists.sentinel(index);
        let mut previous_addr = 0_usize;
        let mut steps = 0_usize;
        // Safety: list nodes live in payloads of blocks this heap owns;
        // the traversal only reads.
        unsafe {
            let mut cur: *const FreeLinks = (*sentinel).next;
            while !core::ptr::eq(cur, sentinel) {
                steps += 1;
                if steps > free_blocks {
                    return Err(IntegrityError::ListCycle { index });
                }
                if !core::ptr::eq((*(*cur).next).prev, cur.cast_mut())
                    || !core::ptr::eq((*(*cur).prev).next, cur.cast_mut())
                {
                    return Err(IntegrityError::BadLink { addr: cur as usize });
                }
                let block = BlockPtr::from_links(cur.cast_mut());
                if block.state() != BlockState::Unallocated {
                    return Err(IntegrityError::ListedNotFree { addr: block.addr() });
                }
                if list_index(block.size()) != index {
                    return Err(IntegrityError::MisfiledBlock {
                        addr: block.addr(),
                        index,
                    });
                }
                if index == N_LISTS - 1 {
                    if block.addr() < previous_addr {
                        return Err(IntegrityError::OutOfOrder { addr: block.addr() });
                    }
                    previous_addr = block.addr();
                }
                listed += 1;
                cur = (*cur).next;
            }
        }
    }
    if listed != free_blocks {
        return Err(IntegrityError::ListPopulation {
            listed,
            walked: free_blocks,
        });
    }
    Ok(())
}

/// Walk one chunk block-by-block; returns the number of free blocks.
fn verify_span(span: ChunkSpan) -> Result<usize, IntegrityError> {
    let mut free_blocks = 0_usize;
    let mut addr = span.base;
    let mut prev_size = 0_usize;
    let mut prev_state: Option<BlockState> = None;

    while addr < span.end {
        // Safety: `addr` stays within the tracked extent; sizes are
        // validated before they advance the cursor.
        let (raw, size, left_size, state) = unsafe {
            let block = BlockPtr::from_addr(addr);
            (
                block.raw_tag(),
                block.size(),
                block.left_size(),
                block.state(),
            )
        };
        if raw == 3 {
            return Err(IntegrityError::IllegalTag { addr });
        }
        if size < FENCEPOST_SIZE || !size.is_multiple_of(8) || span.end - addr < size {
            return Err(IntegrityError::BadSize { addr, size });
        }
        let expected = if addr == span.base { 0 } else { prev_size };
        if left_size != expected {
            return Err(IntegrityError::TagMismatch {
                addr,
                found: left_size,
                expected,
            });
        }
        if addr == span.base && state != BlockState::Fencepost {
            return Err(IntegrityError::MissingFencepost { addr });
        }
        if state == BlockState::Unallocated {
            if prev_state == Some(BlockState::Unallocated) {
                return Err(IntegrityError::AdjacentFree { addr });
            }
            if size < MIN_BLOCK_SIZE {
                return Err(IntegrityError::BadSize { addr, size });
            }
            free_blocks += 1;
        }
        prev_state = Some(state);
        prev_size = size;
        addr += size;
    }
    if prev_state != Some(BlockState::Fencepost) {
        return Err(IntegrityError::MissingFencepost {
            addr: span.end - prev_size,
        });
    }
    Ok(free_blocks)
}

/// Snapshot every block of every chunk, in address order.
#[must_use]
pub fn blocks<S: ChunkSource>(heap: &Heap<S>) -> Vec<BlockView> {
    heap.chunks
        .spans()
        .iter()
        .flat_map(|span| span_views(*span))
        .collect()
}

/// Log one line per block of every chunk.
///
/// With [`COLOR_ENV`] set to [`COLOR_SENTINEL`], lines come out green for
/// unallocated blocks, blue for allocated ones and yellow for fenceposts.
pub fn dump<S: ChunkSource>(heap: &Heap<S>) {
    let colours = colours_enabled();
    for (i, span) in heap.chunks.spans().iter().enumerate() {
        info!(
            "chunk {i}: {:#x}..{:#x} ({} bytes)",
            span.base,
            span.end,
            span.end - span.base
        );
        for view in span_views(*span) {
            let (tint, reset) = if colours {
                (tint(view.state), RESET)
            } else {
                ("", "")
            };
            info!(
                "  {}{:#x} {:<11} size {:>8} left {:>8}{}",
                tint,
                view.addr,
                state_name(view.state),
                view.size,
                view.left_size,
                reset
            );
        }
    }
}

fn span_views(span: ChunkSpan) -> Vec<BlockView> {
    let mut views = Vec::new();
    let mut addr = span.base;
    while addr < span.end {
        // Safety: the address lies inside a tracked chunk; a corrupt size
        // stops the walk rather than running off the extent.
        let view = unsafe {
            let block = BlockPtr::from_addr(addr);
            BlockView {
                addr,
                size: block.size(),
                left_size: block.left_size(),
                state: block.state(),
            }
        };
        views.push(view);
        if view.size < FENCEPOST_SIZE || !view.size.is_multiple_of(8) {
            break;
        }
        addr += view.size;
    }
    views
}

fn colours_enabled() -> bool {
    std::env::var(COLOR_ENV).is_ok_and(|value| value == COLOR_SENTINEL)
}

const fn tint(state: BlockState) -> &'static str {
    match state {
        BlockState::Unallocated => GREEN,
        BlockState::Allocated => BLUE,
        BlockState::Fencepost => YELLOW,
    }
}

const fn state_name(state: BlockState) -> &'static str {
    match state {
        BlockState::Unallocated => "unallocated",
        BlockState::Allocated => "allocated",
        BlockState::Fencepost => "fencepost",
    }
}
