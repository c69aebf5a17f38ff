//! Shared test scaffolding.
//!
//! `RegionSource` stands in for the OS: the "program break" is a cursor
//! into one aligned slab from the system allocator, and mappings come
//! from the system allocator too. This keeps the tests deterministic
//! and off the real break.

#![allow(dead_code)]

use core::ptr::NonNull;
use std::alloc::{alloc, alloc_zeroed, dealloc, Layout};

use buddy_heap::{Heap, MemorySource, ARENA_SIZE};

const MAP_ALIGN: usize = 16;

pub struct RegionSource {
    region: *mut u8,
    layout: Layout,
    cursor: usize,
}

impl RegionSource {
    /// `skew` offsets the initial break so arena initialization has
    /// alignment padding to apply, like a real process would.
    pub fn new(skew: usize) -> Self {
        assert!(skew < ARENA_SIZE);
        let layout = Layout::from_size_align(3 * ARENA_SIZE, ARENA_SIZE).unwrap();
        let region = unsafe { alloc(layout) };
        assert!(!region.is_null(), "failed to allocate test region");
        Self {
            region,
            layout,
            cursor: skew,
        }
    }
}

impl Drop for RegionSource {
    fn drop(&mut self) {
        unsafe { dealloc(self.region, self.layout) };
    }
}

impl MemorySource for RegionSource {
    fn current(&self) -> *mut u8 {
        self.region.wrapping_add(self.cursor)
    }

    unsafe fn extend(&mut self, len: usize) -> Option<NonNull<u8>> {
        if self.cursor + len > self.layout.size() {
            return None;
        }
        let at = self.region.add(self.cursor);
        self.cursor += len;
        NonNull::new(at)
    }

    fn map(&mut self, len: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(len, MAP_ALIGN).ok()?;
        NonNull::new(unsafe { alloc_zeroed(layout) })
    }

    unsafe fn unmap(&mut self, ptr: NonNull<u8>, len: usize) {
        let layout = Layout::from_size_align(len, MAP_ALIGN).unwrap();
        dealloc(ptr.as_ptr(), layout);
    }
}

/// Heap over a fresh region whose break starts unaligned.
pub fn new_heap() -> Heap<RegionSource> {
    Heap::with_source(RegionSource::new(0x1200))
}

/// A memory source that refuses every request, for exercising the
/// initialization failure path.
pub struct BarrenSource;

impl MemorySource for BarrenSource {
    fn current(&self) -> *mut u8 {
        core::ptr::null_mut()
    }

    unsafe fn extend(&mut self, _len: usize) -> Option<NonNull<u8>> {
        None
    }

    fn map(&mut self, _len: usize) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn unmap(&mut self, _ptr: NonNull<u8>, _len: usize) {}
}
