//! OS memory sources.
//!
//! The heap acquires its arena by extending the program break and
//! serves large requests from private anonymous mappings. Both
//! facilities sit behind [`MemorySource`] so the engine can run against
//! a deterministic in-process region in tests while production uses
//! the real break.

use core::ptr::NonNull;

/// Where the heap gets its memory.
pub trait MemorySource {
    /// Address the next [`MemorySource::extend`] would return, i.e. the
    /// current program break.
    fn current(&self) -> *mut u8;

    /// Grows the data segment by `len` bytes and returns the start of
    /// the new region (the old break), or `None` on failure.
    ///
    /// # Safety
    ///
    /// The program break is a process-wide resource; the caller must be
    /// the only party moving it.
    unsafe fn extend(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Acquires an independent zero-filled mapping of `len` bytes.
    fn map(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Returns a mapping to the OS.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a live mapping of exactly `len` bytes obtained
    /// from [`MemorySource::map`], with no outstanding references.
    unsafe fn unmap(&mut self, ptr: NonNull<u8>, len: usize);
}

/// Production source: program break via `sbrk`, large blocks via
/// `mmap`.
#[derive(Default)]
pub struct SbrkSource;

impl MemorySource for SbrkSource {
    fn current(&self) -> *mut u8 {
        unsafe { libc::sbrk(0) as *mut u8 }
    }

    unsafe fn extend(&mut self, len: usize) -> Option<NonNull<u8>> {
        let prev = libc::sbrk(len as libc::intptr_t);
        if prev as isize == -1 {
            return None;
        }
        NonNull::new(prev as *mut u8)
    }

    fn map(&mut self, len: usize) -> Option<NonNull<u8>> {
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return None;
        }
        NonNull::new(addr as *mut u8)
    }

    unsafe fn unmap(&mut self, ptr: NonNull<u8>, len: usize) {
        libc::munmap(ptr.as_ptr() as *mut libc::c_void, len);
    }
}
