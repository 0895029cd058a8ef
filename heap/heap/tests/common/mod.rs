//! Shared fixtures: heaps over private fixed regions, so every test is
//! hermetic and free to run in parallel with the others.

#![allow(dead_code)]

use core::cell::Cell;
use core::ptr::NonNull;
use heap::{ARENA_SIZE, BlockState, BlockView, ChunkSource, FixedRegion, Heap};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// A heap over a private, arena-multiple buffer.
pub struct TestHeap<S: ChunkSource = FixedRegion> {
    pub heap: Heap<S>,
    _backing: Box<[u64]>,
}

impl<S: ChunkSource> Deref for TestHeap<S> {
    type Target = Heap<S>;

    fn deref(&self) -> &Self::Target {
        &self.heap
    }
}

impl<S: ChunkSource> DerefMut for TestHeap<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.heap
    }
}

fn backing(arenas: usize) -> (Box<[u64]>, FixedRegion) {
    let mut backing: Box<[u64]> = vec![0_u64; arenas * ARENA_SIZE / 8].into_boxed_slice();
    let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
    // Safety: the buffer is 8-aligned, writable, and owned by the fixture
    // for as long as the heap lives.
    let source = unsafe { FixedRegion::new(base, backing.len() * 8) };
    (backing, source)
}

/// A heap whose source can hand out `arenas` arena-sized extensions.
pub fn heap_with(arenas: usize) -> TestHeap {
    let (backing, source) = backing(arenas);
    TestHeap {
        heap: Heap::new(source),
        _backing: backing,
    }
}

/// Wraps a source and counts how often the heap extends through it.
pub struct CountingSource<S> {
    inner: S,
    calls: Rc<Cell<usize>>,
}

impl<S: ChunkSource> ChunkSource for CountingSource<S> {
    fn extend(&mut self, delta: usize) -> Option<NonNull<u8>> {
        self.calls.set(self.calls.get() + 1);
        self.inner.extend(delta)
    }
}

/// Like [`heap_with`], but reporting the number of extensions taken.
pub fn counting_heap(arenas: usize) -> (TestHeap<CountingSource<FixedRegion>>, Rc<Cell<usize>>) {
    let (backing, source) = backing(arenas);
    let calls = Rc::new(Cell::new(0));
    let heap = Heap::new(CountingSource {
        inner: source,
        calls: Rc::clone(&calls),
    });
    (
        TestHeap {
            heap,
            _backing: backing,
        },
        calls,
    )
}

/// Every block currently unallocated, in address order.
pub fn free_blocks<S: ChunkSource>(heap: &Heap<S>) -> Vec<BlockView> {
    heap.blocks()
        .into_iter()
        .filter(|b| b.state == BlockState::Unallocated)
        .collect()
}

/// Every block currently allocated, in address order.
pub fn allocated_blocks<S: ChunkSource>(heap: &Heap<S>) -> Vec<BlockView> {
    heap.blocks()
        .into_iter()
        .filter(|b| b.state == BlockState::Allocated)
        .collect()
}

/// The view of the block that owns user pointer `ptr`.
pub fn block_of<S: ChunkSource>(heap: &Heap<S>, ptr: *mut u8) -> BlockView {
    let addr = ptr as usize - heap::HEADER_SIZE;
    heap.blocks()
        .into_iter()
        .find(|b| b.addr == addr)
        .expect("pointer does not start a block")
}
