//! Fatal-path diagnostics. These run through the engine API, where the
//! abort is a panic the harness can observe.

mod common;

use common::heap_with;

#[test]
#[should_panic(expected = "double free")]
fn double_free_aborts_with_a_diagnostic() {
    let mut th = heap_with(2);
    let p = th.request(16);
    th.release(p);
    th.release(p);
}

#[test]
#[should_panic(expected = "not produced by this heap")]
fn foreign_pointer_aborts_with_a_diagnostic() {
    let mut th = heap_with(2);
    let _ = th.request(16);
    let mut local = [0_u64; 8];
    th.release(local.as_mut_ptr().cast::<u8>().wrapping_add(16));
}

#[test]
#[should_panic(expected = "not produced by this heap")]
fn pointer_into_a_fencepost_aborts() {
    let mut th = heap_with(2);
    let p = th.request(16);
    // Rewind to the chunk's left fencepost: tracked memory, but no block
    // the heap ever handed out.
    let span = th.chunk_spans()[0];
    let bogus = (span.base + heap::HEADER_SIZE) as *mut u8;
    let _ = p;
    th.release(bogus);
}
