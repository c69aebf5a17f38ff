//! Process-wide heap instance.
//!
//! The core in [`Heap`] runs single-threaded; this module supplies the
//! serialization wrapper: one heap behind a busy flag, every entry
//! point holding it for the full call, plus C-style null-returning
//! wrappers over the fallible API.

use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::buddy::BlockHeader;
use crate::heap::Heap;
use crate::source::SbrkSource;
use crate::HeapStats;

/// Strictest alignment every payload satisfies: blocks are aligned to
/// at least the minimum block size and payloads sit one header past
/// the block start.
const PAYLOAD_ALIGN: usize = 1 << BlockHeader::SIZE.trailing_zeros();

/// The one heap this crate serializes, guarded by a busy flag.
///
/// There is no guard type: callers run a closure under the flag, so
/// the exclusive borrow cannot outlive the critical section. Spinning
/// is enough here because hold times are a single heap call and the
/// flag is never taken reentrantly.
struct LockedHeap {
    busy: AtomicBool,
    heap: UnsafeCell<Heap<SbrkSource>>,
}

// The busy flag hands the inner heap to one thread at a time.
unsafe impl Sync for LockedHeap {}

impl LockedHeap {
    const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            heap: UnsafeCell::new(Heap::new()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Heap<SbrkSource>) -> R) -> R {
        while self.busy.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
        // SAFETY: the busy flag grants exclusive access until released
        // below, and the closure cannot smuggle the borrow out.
        let result = f(unsafe { &mut *self.heap.get() });
        self.busy.store(false, Ordering::Release);
        result
    }
}

/// Serialized, process-wide heap.
///
/// Construction is const, so an instance can live in a `static`:
///
/// ```no_run
/// use buddy_heap::GlobalHeap;
///
/// static HEAP: GlobalHeap = GlobalHeap::new();
///
/// let p = HEAP.allocate(256);
/// assert!(!p.is_null());
/// unsafe { HEAP.free(p) };
/// ```
pub struct GlobalHeap {
    inner: LockedHeap,
}

impl GlobalHeap {
    pub const fn new() -> Self {
        Self {
            inner: LockedHeap::new(),
        }
    }

    /// Allocates `size` bytes; null on failure.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.inner.with(|heap| match heap.allocate(size) {
            Ok(p) => p.as_ptr(),
            Err(_) => ptr::null_mut(),
        })
    }

    /// Allocates `count * size` zeroed bytes; null on failure or
    /// overflow.
    pub fn zero_allocate(&self, count: usize, size: usize) -> *mut u8 {
        self.inner.with(|heap| match heap.zero_allocate(count, size) {
            Ok(p) => p.as_ptr(),
            Err(_) => ptr::null_mut(),
        })
    }

    /// Releases `payload`; null, damaged, and repeated pointers are
    /// ignored.
    ///
    /// # Safety
    ///
    /// As [`Heap::free`].
    pub unsafe fn free(&self, payload: *mut u8) {
        self.inner.with(|heap| heap.free(payload));
    }

    /// Resizes `payload` to `size` bytes; null on failure, in which
    /// case the old pointer is still valid.
    ///
    /// # Safety
    ///
    /// As [`Heap::reallocate`].
    pub unsafe fn reallocate(&self, payload: *mut u8, size: usize) -> *mut u8 {
        self.inner.with(|heap| match heap.reallocate(payload, size) {
            Ok(p) => p.as_ptr(),
            Err(_) => ptr::null_mut(),
        })
    }

    pub fn free_blocks(&self) -> usize {
        self.inner.with(|heap| heap.free_blocks())
    }

    pub fn free_bytes(&self) -> usize {
        self.inner.with(|heap| heap.free_bytes())
    }

    pub fn allocated_blocks(&self) -> usize {
        self.inner.with(|heap| heap.allocated_blocks())
    }

    pub fn allocated_bytes(&self) -> usize {
        self.inner.with(|heap| heap.allocated_bytes())
    }

    pub fn header_bytes(&self) -> usize {
        self.inner.with(|heap| heap.header_bytes())
    }

    pub fn header_size(&self) -> usize {
        self.inner.with(|heap| heap.header_size())
    }

    pub fn stats(&self) -> HeapStats {
        self.inner.with(|heap| heap.stats())
    }
}

impl Default for GlobalHeap {
    fn default() -> Self {
        Self::new()
    }
}

/// Payloads carry no alignment guarantee beyond [`PAYLOAD_ALIGN`], so
/// stricter layouts are refused rather than over-allocated.
unsafe impl GlobalAlloc for GlobalHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAYLOAD_ALIGN {
            return ptr::null_mut();
        }
        self.allocate(layout.size())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAYLOAD_ALIGN {
            return ptr::null_mut();
        }
        self.zero_allocate(layout.size(), 1)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > PAYLOAD_ALIGN {
            return ptr::null_mut();
        }
        self.reallocate(ptr, new_size)
    }
}
