use crate::{RawLock, RawUnlock};
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// Proof that the raw lock is held; releasing it is its `Drop`.
///
/// Every way out of a critical section — a closure returning from
/// [`Mutex::with_lock`], a guard going out of scope, a panic unwinding
/// through a heap operation — ends with this token dropping. Funnelling
/// release through one type makes "the lock is released on every exit
/// path" a structural property instead of a convention each call site
/// has to uphold.
struct Held<'a, R: RawUnlock> {
    lock: &'a R,
}

impl<R: RawUnlock> Drop for Held<'_, R> {
    fn drop(&mut self) {
        // Safety: a `Held` is only created immediately after a successful
        // acquisition and is never duplicated.
        unsafe { self.lock.raw_unlock() }
    }
}

/// The mutex serialising a heap engine.
///
/// One of these guards the whole allocator state — free lists, chunk
/// table, every block header. An entry point acquires it once and keeps
/// it for the full operation, growth included, so the linearisation
/// order of allocation and free events is simply the acquisition order
/// here. [`with_lock`](Self::with_lock) is that entry-point shape;
/// [`lock`](Self::lock) and [`try_lock`](Self::try_lock) expose the same
/// exclusivity as RAII views for code that wants to hold the heap across
/// a scope, such as the diagnostic walkers.
///
/// There is no poisoning and no owner tracking: a panic under the heap
/// lock means allocator state that cannot be trusted, and the shipped
/// profiles abort on it. The release token still unlocks during the
/// unwind, so the non-aborting test profile can observe the failure and
/// keep going.
///
/// The raw primitive `R` is pluggable through [`RawLock`] and
/// [`RawUnlock`]; the allocator instantiates it with [`crate::RawSpin`],
/// which cannot itself allocate.
///
/// # Examples
///
/// ```
/// use heap_sync::HeapMutex;
///
/// let m = HeapMutex::new(0_u32);
/// m.with_lock(|v| *v += 1);
/// assert_eq!(*m.lock(), 1);
/// ```
pub struct Mutex<T, R> {
    /// The raw exclusion primitive.
    lock: R,
    /// The serialised state.
    value: UnsafeCell<T>,
    /// Keeps auto-`Send`/`Sync` off; the unsafe impls below reinstate
    /// them with the right bounds.
    _marker: PhantomData<*mut ()>,
}

// Safety: `R` provides the exclusion and the memory ordering; the value
// may only cross threads when `T: Send`.
unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}
unsafe impl<T: Send, R: Send> Send for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    /// Pair a raw lock with the value it will serialise. Acquires
    /// nothing.
    pub const fn from_parts(lock: R, value: T) -> Self {
        Self {
            lock,
            value: UnsafeCell::new(value),
            _marker: PhantomData,
        }
    }

    /// Direct access without locking: `&mut self` already proves the
    /// caller is alone.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T, R> Mutex<T, R>
where
    R: RawLock + RawUnlock,
{
    /// Run one whole operation under the lock.
    ///
    /// Acquire, run `f` to completion, release — on return and unwind
    /// alike. Every public allocator entry point is one call to this.
    #[inline]
    pub fn with_lock<Ret>(&self, f: impl FnOnce(&mut T) -> Ret) -> Ret {
        f(&mut *self.lock())
    }

    /// Acquire the lock and hand back an RAII view of the value.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.lock.raw_lock();
        MutexGuard {
            value: self.value.get(),
            _held: Held { lock: &self.lock },
        }
    }

    /// Acquire only if the lock is free; `None` when contended.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.lock.raw_try_lock().then(|| MutexGuard {
            value: self.value.get(),
            _held: Held { lock: &self.lock },
        })
    }
}

/// View of the value while the lock is held.
///
/// Carries the release token, so dropping the guard is what unlocks;
/// the guard itself only knows how to reach the value.
pub struct MutexGuard<'a, T, R>
where
    R: RawUnlock,
{
    value: *mut T,
    _held: Held<'a, R>,
}

impl<T, R> Deref for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the token in `_held` keeps the lock for the guard's
        // whole lifetime, so the value is not aliased.
        unsafe { &*self.value }
    }
}

impl<T, R> DerefMut for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as in `deref`.
        unsafe { &mut *self.value }
    }
}
