//! Dual-path user-space heap allocator.
//!
//! Two block managers behind one surface:
//!
//! - a **binary buddy allocator** over a single 4 MiB arena acquired
//!   from the program break, for requests that fit a top-order block;
//! - a **direct-map pool** for everything larger, one private anonymous
//!   mapping per block.
//!
//! Both paths share the embedded block header format, the per-block
//! free predicate, and a statistics ledger that stays consistent across
//! every split, coalesce, allocate, and free. Headers carry a canary
//! tag; a block whose header fails the check on free is ignored rather
//! than torn down, keeping the heap available in the face of buggy
//! clients.
//!
//! [`Heap`] is the single-threaded core; [`GlobalHeap`] wraps one
//! instance in a spinlock for process-wide use and implements
//! [`core::alloc::GlobalAlloc`] for layouts the heap can align.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod buddy;
mod global_heap;
mod heap;
mod source;

pub use buddy::{HeapStats, ARENA_SIZE, INITIAL_BLOCKS, MAX_ORDER, MIN_BLOCK_SIZE, TOP_BLOCK_SIZE};
pub use global_heap::GlobalHeap;
pub use heap::Heap;
pub use source::{MemorySource, SbrkSource};

/// The error type used for heap operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// Zero size, a size above [`MAX_REQUEST`], or an overflowing
    /// element count.
    InvalidRequest,
    /// The OS refused to extend the break or map pages, or no free
    /// block of sufficient order exists.
    NoMemory,
    /// A header failed its canary check during reallocation.
    CorruptedBlock,
}

/// A [`Result`] type with [`HeapError`] as the error type.
pub type HeapResult<T = ()> = Result<T, HeapError>;

/// Hard ceiling on a single request, in bytes.
pub const MAX_REQUEST: usize = 100_000_000;

/// Rounds `addr` up to the next multiple of `align`, which must be a
/// power of two.
#[inline]
pub(crate) const fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`; the alignment must be a power of
/// two.
#[inline]
pub(crate) const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & (align - 1) == 0
}
