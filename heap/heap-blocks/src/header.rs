use crate::state::BlockState;
use bitfield_struct::bitfield;

/// Byte granule of the heap: block sizes are multiples of this and user
/// pointers are aligned to it.
pub const ALIGNMENT: usize = 8;

/// Bytes of bookkeeping in front of every payload.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// A fencepost is a bare header: [`HEADER_SIZE`] rounded up to [`ALIGNMENT`]
/// (already a multiple, so the two coincide).
pub const FENCEPOST_SIZE: usize = HEADER_SIZE;

/// Smallest legal footprint of any allocatable block: the header plus the
/// 16 payload bytes that hold the free-list link pair once the block is
/// returned.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE + 2 * size_of::<usize>();

/// Round `n` up to the next multiple of [`ALIGNMENT`].
///
/// ```
/// # use heap_blocks::round_up;
/// assert_eq!(round_up(0), 0);
/// assert_eq!(round_up(1), 8);
/// assert_eq!(round_up(8), 8);
/// assert_eq!(round_up(9), 16);
/// ```
#[inline]
#[must_use]
pub const fn round_up(n: usize) -> usize {
    (n + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

/// Packed size-and-state word.
///
/// Block sizes are multiples of 8, so the low three bits of the size are
/// always zero in memory. The two-bit state tag lives there instead and the
/// size is kept above it in 8-byte quanta; the stored word therefore equals
/// `size | state` numerically.
#[bitfield(u64)]
pub(crate) struct PackedSize {
    /// Two-bit state tag (see [`BlockState`]).
    #[bits(2)]
    state_bits: u8,
    /// Reserved low bit, always zero.
    #[bits(1)]
    __: bool,
    /// Block size in 8-byte quanta.
    #[bits(61)]
    quanta: u64,
}

/// In-band bookkeeping in front of every block.
///
/// `left_size` mirrors the size field of the physically preceding block (or
/// is zero for the first block of a chunk). The pair forms the boundary
/// tag: both physical neighbours are reachable in O(1).
///
/// ```
/// use heap_blocks::{BlockHeader, BlockState};
///
/// let mut h = BlockHeader::new(48, BlockState::Unallocated, 16);
/// assert_eq!(h.size(), 48);
/// assert_eq!(h.left_size(), 16);
///
/// // Size updates leave the state tag untouched and vice versa.
/// h.set_size(64);
/// assert_eq!(h.state(), BlockState::Unallocated);
/// h.set_state(BlockState::Allocated);
/// assert_eq!(h.size(), 64);
/// ```
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct BlockHeader {
    packed: PackedSize,
    left_size: u64,
}

impl BlockHeader {
    /// Build a header for a block of `size` total bytes in `state`, whose
    /// physical left neighbour has size `left_size`.
    #[must_use]
    pub const fn new(size: usize, state: BlockState, left_size: usize) -> Self {
        debug_assert!(size.is_multiple_of(ALIGNMENT));
        Self {
            packed: PackedSize::new()
                .with_state_bits(state.into_bits())
                .with_quanta((size / ALIGNMENT) as u64),
            left_size: left_size as u64,
        }
    }

    /// Total footprint in bytes, header included.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        (self.packed.quanta() as usize) * ALIGNMENT
    }

    /// Replace the size, preserving the state tag.
    #[inline]
    pub fn set_size(&mut self, size: usize) {
        debug_assert!(size.is_multiple_of(ALIGNMENT));
        self.packed.set_quanta((size / ALIGNMENT) as u64);
    }

    /// Decoded allocation state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> BlockState {
        BlockState::from_bits(self.packed.state_bits())
    }

    /// Replace the state tag, preserving the size.
    #[inline]
    pub fn set_state(&mut self, state: BlockState) {
        self.packed.set_state_bits(state.into_bits());
    }

    /// The raw two-bit tag, undecoded. Only the integrity walk wants this:
    /// it distinguishes the illegal tag `3` from a real fencepost.
    #[inline]
    #[must_use]
    pub const fn raw_tag(&self) -> u8 {
        self.packed.state_bits()
    }

    /// Size of the physical left neighbour, or zero for the first block of
    /// a chunk.
    #[inline]
    #[must_use]
    pub const fn left_size(&self) -> usize {
        self.left_size as usize
    }

    /// Update the boundary-tag mirror of the left neighbour's size.
    #[inline]
    pub fn set_left_size(&mut self, left_size: usize) {
        self.left_size = left_size as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_two_words() {
        assert_eq!(HEADER_SIZE, 16);
        assert_eq!(FENCEPOST_SIZE, 16);
        assert_eq!(MIN_BLOCK_SIZE, 32);
    }

    #[test]
    fn packed_word_is_size_or_state() {
        let h = BlockHeader::new(4064, BlockState::Allocated, 0);
        // The stored word is literally size | state.
        assert_eq!(u64::from(h.packed), 4064 | 1);
    }

    #[test]
    fn setters_preserve_the_other_field() {
        let mut h = BlockHeader::new(32, BlockState::Fencepost, 48);
        h.set_size(120);
        assert_eq!(h.state(), BlockState::Fencepost);
        assert_eq!(h.size(), 120);
        h.set_state(BlockState::Unallocated);
        assert_eq!(h.size(), 120);
        assert_eq!(h.left_size(), 48);
    }

    #[test]
    fn large_sizes_survive_packing() {
        let h = BlockHeader::new(1 << 40, BlockState::Unallocated, 1 << 39);
        assert_eq!(h.size(), 1 << 40);
        assert_eq!(h.left_size(), 1 << 39);
    }
}
