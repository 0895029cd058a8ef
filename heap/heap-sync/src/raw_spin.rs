use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Atomic-flag spin primitive.
///
/// The allocator's critical sections are a handful of pointer splices and,
/// at worst, one break extension; busy-waiting through them is cheaper
/// than parking a thread, and spinning keeps the primitive free of any
/// dependency on the very allocator it protects.
///
/// Not fair and not reentrant: a thread that re-enters (say, from a signal
/// handler) deadlocks on itself.
///
/// # Examples
///
/// ```
/// use heap_sync::RawSpin;
///
/// let lock = RawSpin::new();
/// lock.lock();
/// // critical section
/// unsafe { lock.unlock() };
/// ```
pub struct RawSpin {
    /// Whether the lock is currently held.
    held: AtomicBool,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    /// Creates a new, unlocked primitive.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Acquires the lock, spinning until it becomes available.
    ///
    /// The inner loop reads relaxed so contending cores hammer a shared
    /// cache line only until it changes, not on every iteration.
    #[inline]
    pub fn lock(&self) {
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `true` on success.
    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.held.swap(true, Ordering::Acquire)
    }

    /// Releases the lock.
    ///
    /// # Safety
    /// The calling thread must hold the lock via a prior successful
    /// [`lock`](Self::lock) or [`try_lock`](Self::try_lock).
    #[inline]
    pub unsafe fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }
}

impl RawLock for RawSpin {
    #[inline]
    fn raw_lock(&self) {
        self.lock();
    }

    #[inline]
    fn raw_try_lock(&self) -> bool {
        self.try_lock()
    }
}

impl RawUnlock for RawSpin {
    #[inline]
    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock() }
    }
}
