//! Smoke test of the process-global allocator behind the C ABI. This is
//! the one test that touches the real program break, so everything lives
//! in a single test function (its own process under the standard harness)
//! and allocation volumes stay small.

#![cfg(unix)]
#![allow(clippy::cast_possible_truncation)]

use heap::{ALIGNMENT, allocate, callocate, deallocate, dump_heap, reallocate, verify_heap};
use std::thread;

struct SendPtr(*mut u8);
// Safety: the pointers are only ever released by the thread that owns the
// wrapper; the allocator itself synchronises internally.
unsafe impl Send for SendPtr {}

#[test]
fn global_entry_points_and_contention() {
    // Basic single-threaded round trip.
    let p = allocate(100);
    assert!(!p.is_null());
    assert_eq!(p as usize % ALIGNMENT, 0);
    for i in 0..100 {
        unsafe { p.add(i).write(i as u8) };
    }

    let q = unsafe { reallocate(p, 300) };
    assert!(!q.is_null());
    let moved = unsafe { core::slice::from_raw_parts(q, 100) };
    assert!(moved.iter().enumerate().all(|(i, &b)| b == i as u8));

    let z = callocate(25, 4);
    assert!(!z.is_null());
    let zeroed = unsafe { core::slice::from_raw_parts(z, 100) };
    assert!(zeroed.iter().all(|&b| b == 0));

    unsafe {
        deallocate(q);
        deallocate(z);
    }
    assert!(allocate(0).is_null());
    unsafe { deallocate(core::ptr::null_mut()) };
    verify_heap();

    // Contended churn across threads; sizes vary per thread and index.
    let handles: Vec<_> = (0..4)
        .map(|t: usize| {
            thread::spawn(move || {
                let mut ptrs = Vec::new();
                for i in 0..200 {
                    let n = 8 + (t * 13 + i * 7) % 240;
                    let p = allocate(n);
                    assert!(!p.is_null());
                    unsafe { p.write_bytes(t as u8, n) };
                    ptrs.push(SendPtr(p));
                }
                for p in ptrs {
                    unsafe { deallocate(p.0) };
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    verify_heap();
    // Exercise the printer; with no logger installed this is a no-op.
    dump_heap();
}
