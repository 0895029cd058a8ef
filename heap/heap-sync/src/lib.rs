//! # Heap Serialisation
//!
//! The lock that turns the single-threaded allocator engine into a
//! thread-safe one. All heap state — free lists, chunk table, every block
//! header — is guarded by exactly one [`HeapMutex`]; an entry point holds
//! it for its whole body, so the linearisation order of allocation events
//! is simply the order of lock acquisition.
//!
//! The primitive lives apart from the engine so it cannot depend on
//! allocation itself: [`RawSpin`] is a bare atomic flag, and [`Mutex`]
//! shapes it for the allocator — [`Mutex::with_lock`] runs one whole
//! operation per acquisition, and release is owned by a single token
//! that drops on return and unwind alike, with RAII guards layered on
//! the same token for scope-long access.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::must_use_candidate)]

mod mutex;
mod raw_spin;

pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;

/// The acquire side of a raw lock primitive.
pub trait RawLock {
    /// Blocks (or spins) until the lock is held by the caller.
    fn raw_lock(&self);
    /// Acquires without blocking; `true` on success.
    fn raw_try_lock(&self) -> bool;
}

/// The release side of a raw lock primitive.
pub trait RawUnlock {
    /// Releases the lock.
    ///
    /// # Safety
    /// The caller must hold the lock.
    unsafe fn raw_unlock(&self);
}

/// The lock used around the allocator engine.
pub type HeapMutex<T> = Mutex<T, RawSpin>;

impl<T> HeapMutex<T> {
    /// Creates an unlocked mutex guarding `value`.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self::from_parts(RawSpin::new(), value)
    }
}
