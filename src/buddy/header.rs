//! Block header shared by both allocation paths.
//!
//! Every block, buddy or direct-mapped, starts with a [`BlockHeader`]
//! followed by the caller's payload. The header records the block's
//! total footprint, its state, and the intrusive links that enroll it
//! in a free list or the large-block registry.

use core::mem;
use core::ptr;

/// Smallest buddy block in bytes, header included.
pub const MIN_BLOCK_SIZE: usize = 128;

/// Highest buddy order.
pub const MAX_ORDER: usize = 10;

/// Size of an order-[`MAX_ORDER`] block (128 KiB). Anything that does
/// not fit here, header included, is served from its own mapping.
pub const TOP_BLOCK_SIZE: usize = MIN_BLOCK_SIZE << MAX_ORDER;

/// Number of top-order blocks carved out at arena initialization.
pub const INITIAL_BLOCKS: usize = 32;

/// Total arena footprint (4 MiB). The arena base is aligned to this.
pub const ARENA_SIZE: usize = INITIAL_BLOCKS * TOP_BLOCK_SIZE;

/// Tag written into every header at creation and checked before a block
/// is released. A mismatch means the client scribbled over the header.
pub(crate) const CANARY: u64 = 0x9e37_79b9_7f4a_7c15;

/// `order` value for direct-mapped blocks, which have no buddy order.
pub(crate) const ORDER_LARGE: u8 = u8::MAX;

/// Per-block metadata embedded at the start of every block.
///
/// `size` is the block's total footprint, header included; the payload
/// starts [`BlockHeader::SIZE`] bytes in. `prev`/`next` link the block
/// into the free list of its order or into the large-block registry.
/// They carry no meaning while a buddy block is handed out.
#[repr(C)]
pub(crate) struct BlockHeader {
    pub(crate) canary: u64,
    pub(crate) size: usize,
    pub(crate) prev: *mut BlockHeader,
    pub(crate) next: *mut BlockHeader,
    pub(crate) order: u8,
    pub(crate) is_free: bool,
    pub(crate) is_large: bool,
}

impl BlockHeader {
    /// Bytes of metadata preceding every payload.
    pub(crate) const SIZE: usize = mem::size_of::<Self>();

    /// Writes a fresh, unlinked header at `at` and returns it.
    ///
    /// # Safety
    ///
    /// `at` must be valid for writes of `size` bytes and aligned for
    /// `BlockHeader`.
    pub(crate) unsafe fn write(
        at: *mut u8,
        size: usize,
        order: u8,
        is_free: bool,
        is_large: bool,
    ) -> *mut BlockHeader {
        let header = at as *mut BlockHeader;
        header.write(BlockHeader {
            canary: CANARY,
            size,
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
            order,
            is_free,
            is_large,
        });
        header
    }

    /// Recovers the header governing a payload pointer.
    ///
    /// # Safety
    ///
    /// `payload` must point [`BlockHeader::SIZE`] bytes past a live
    /// header written by this allocator.
    pub(crate) unsafe fn from_payload(payload: *mut u8) -> *mut BlockHeader {
        payload.sub(Self::SIZE) as *mut BlockHeader
    }

    /// First byte of the caller-visible payload.
    pub(crate) fn payload(&self) -> *mut u8 {
        (self as *const Self as *mut u8).wrapping_add(Self::SIZE)
    }

    /// Caller-visible bytes in this block.
    pub(crate) fn payload_size(&self) -> usize {
        self.size - Self::SIZE
    }

    pub(crate) fn canary_ok(&self) -> bool {
        self.canary == CANARY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc, dealloc, Layout};

    #[test]
    fn header_fits_smallest_block() {
        assert!(BlockHeader::SIZE < MIN_BLOCK_SIZE);
        assert_eq!(TOP_BLOCK_SIZE, 131072);
        assert_eq!(ARENA_SIZE, 32 * 131072);
    }

    #[test]
    fn payload_roundtrip() {
        let layout = Layout::from_size_align(MIN_BLOCK_SIZE, MIN_BLOCK_SIZE).unwrap();
        let buf = unsafe { alloc(layout) };
        assert!(!buf.is_null());

        unsafe {
            let header = BlockHeader::write(buf, MIN_BLOCK_SIZE, 0, true, false);
            assert!((*header).canary_ok());
            assert_eq!((*header).payload_size(), MIN_BLOCK_SIZE - BlockHeader::SIZE);

            let payload = (*header).payload();
            assert_eq!(payload as usize - buf as usize, BlockHeader::SIZE);
            assert_eq!(BlockHeader::from_payload(payload), header);

            dealloc(buf, layout);
        }
    }
}
