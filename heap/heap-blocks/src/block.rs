use crate::header::{ALIGNMENT, BlockHeader, HEADER_SIZE};
use crate::state::BlockState;
use core::ptr::NonNull;

/// Forward/back links threaded through the first payload bytes of an
/// unallocated block.
///
/// The pointers address other *link pairs* — either the links of another
/// free block or a list sentinel — never block headers directly.
/// [`BlockPtr::from_links`] recovers the owning block from a link pair that
/// is known to live inside one.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct FreeLinks {
    pub prev: *mut FreeLinks,
    pub next: *mut FreeLinks,
}

impl FreeLinks {
    /// An unlinked pair. Sentinels start out like this and are self-linked
    /// before first use.
    #[must_use]
    pub const fn unlinked() -> Self {
        Self {
            prev: core::ptr::null_mut(),
            next: core::ptr::null_mut(),
        }
    }
}

/// Typed handle to a block header somewhere inside a chunk.
///
/// Every byte offset the heap ever computes — right and left neighbour,
/// user pointer, link pair — goes through this type; the rest of the
/// engine never touches raw addresses. The handle is a plain pointer
/// wrapper: copying it is free and implies nothing about validity.
///
/// # Safety
///
/// All reading and writing accessors are `unsafe`: the caller must
/// guarantee the handle points at a live header inside a chunk it owns
/// (in practice: the global lock is held, or the test holds `&mut` to the
/// whole heap). Neighbour navigation additionally requires the boundary
/// tags to be intact, and [`left`](Self::left) must not be called on a
/// block whose `left_size` is zero.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BlockPtr(NonNull<BlockHeader>);

impl BlockPtr {
    /// Wrap the header at `addr`.
    ///
    /// # Safety
    /// `addr` must be non-zero and 8-aligned; dereferencing accessors
    /// additionally need a live header there.
    #[inline]
    #[must_use]
    pub unsafe fn from_addr(addr: usize) -> Self {
        debug_assert!(addr != 0 && addr.is_multiple_of(ALIGNMENT));
        Self(unsafe { NonNull::new_unchecked(addr as *mut BlockHeader) })
    }

    /// Recover the block owning a user pointer, or `None` for null.
    #[inline]
    #[must_use]
    pub fn from_user_ptr(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr.wrapping_sub(HEADER_SIZE).cast::<BlockHeader>()).map(Self)
    }

    /// Recover the block owning a link pair stored in its payload.
    ///
    /// # Safety
    /// `links` must be the payload link pair of a free block (not a list
    /// sentinel).
    #[inline]
    #[must_use]
    pub unsafe fn from_links(links: *mut FreeLinks) -> Self {
        unsafe { Self::from_addr(links as usize - HEADER_SIZE) }
    }

    /// Address of the header.
    #[inline]
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// The pointer handed to the caller: first byte past the header.
    #[inline]
    #[must_use]
    pub fn user_ptr(self) -> *mut u8 {
        self.0.as_ptr().cast::<u8>().wrapping_add(HEADER_SIZE)
    }

    /// Location of the link pair within the payload.
    #[inline]
    #[must_use]
    pub fn links_ptr(self) -> *mut FreeLinks {
        self.0.as_ptr().cast::<u8>().wrapping_add(HEADER_SIZE).cast()
    }

    /// Total footprint in bytes.
    ///
    /// # Safety
    /// The handle must point at a live header (see type docs).
    #[inline]
    #[must_use]
    pub unsafe fn size(self) -> usize {
        unsafe { (*self.0.as_ptr()).size() }
    }

    /// # Safety
    /// Live header; `size` must be a multiple of 8.
    #[inline]
    pub unsafe fn set_size(self, size: usize) {
        unsafe { (*self.0.as_ptr()).set_size(size) }
    }

    /// # Safety
    /// Live header.
    #[inline]
    #[must_use]
    pub unsafe fn state(self) -> BlockState {
        unsafe { (*self.0.as_ptr()).state() }
    }

    /// # Safety
    /// Live header.
    #[inline]
    pub unsafe fn set_state(self, state: BlockState) {
        unsafe { (*self.0.as_ptr()).set_state(state) }
    }

    /// Undecoded state tag, for the integrity walk.
    ///
    /// # Safety
    /// Live header.
    #[inline]
    #[must_use]
    pub unsafe fn raw_tag(self) -> u8 {
        unsafe { (*self.0.as_ptr()).raw_tag() }
    }

    /// # Safety
    /// Live header.
    #[inline]
    #[must_use]
    pub unsafe fn left_size(self) -> usize {
        unsafe { (*self.0.as_ptr()).left_size() }
    }

    /// # Safety
    /// Live header.
    #[inline]
    pub unsafe fn set_left_size(self, left_size: usize) {
        unsafe { (*self.0.as_ptr()).set_left_size(left_size) }
    }

    /// Overwrite the whole header in one go.
    ///
    /// # Safety
    /// The handle must point at writable chunk memory; this is how blocks
    /// and fenceposts come into existence.
    #[inline]
    pub unsafe fn write(self, size: usize, state: BlockState, left_size: usize) {
        unsafe {
            self.0.as_ptr().write(BlockHeader::new(size, state, left_size));
        }
    }

    /// Physical right neighbour: the block `size` bytes further up.
    ///
    /// # Safety
    /// Live header; within a chunk every block up to and including the
    /// right fencepost has a right neighbour, the fencepost itself does
    /// not.
    #[inline]
    #[must_use]
    pub unsafe fn right(self) -> Self {
        unsafe { Self::from_addr(self.addr() + self.size()) }
    }

    /// Physical left neighbour: the block `left_size` bytes back.
    ///
    /// # Safety
    /// Live header with a non-zero `left_size` and an intact boundary tag.
    #[inline]
    #[must_use]
    pub unsafe fn left(self) -> Self {
        let left_size = unsafe { self.left_size() };
        debug_assert!(left_size != 0);
        unsafe { Self::from_addr(self.addr() - left_size) }
    }
}
