//! Request routing across the buddy arena and the direct-map pool.

use core::cmp;
use core::ptr::{self, NonNull};

use log::{debug, warn};

use crate::buddy::{Arena, BlockHeader, BlockList, Ledger, Pool, ORDER_LARGE, TOP_BLOCK_SIZE};
use crate::source::{MemorySource, SbrkSource};
use crate::{HeapError, HeapResult, MAX_REQUEST};

/// Dual-path heap allocator.
///
/// Requests that fit a top-order block, header included, are served
/// from a buddy arena acquired from the program break on first use.
/// Anything larger gets a private anonymous mapping of its own; those
/// blocks never split or coalesce and are returned to the OS on free.
///
/// The heap runs every call to completion with no internal locking;
/// wrap it (or use [`crate::GlobalHeap`]) when sharing across threads.
///
/// ```no_run
/// use buddy_heap::Heap;
///
/// let mut heap = Heap::new();
/// let p = heap.allocate(100).unwrap();
/// unsafe { heap.free(p.as_ptr()) };
/// assert_eq!(heap.free_bytes(), heap.allocated_bytes());
/// ```
pub struct Heap<S: MemorySource = SbrkSource> {
    source: S,
    arena: Option<Arena>,
    large: BlockList,
    ledger: Ledger,
}

impl Heap<SbrkSource> {
    /// Heap over the real program break and mapping facility.
    pub const fn new() -> Self {
        Self::with_source(SbrkSource)
    }
}

impl Default for Heap<SbrkSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemorySource> Heap<S> {
    /// Heap over a custom memory source.
    pub const fn with_source(source: S) -> Self {
        Self {
            source,
            arena: None,
            large: BlockList::new(),
            ledger: Ledger::new(),
        }
    }

    /// Hands out at least `size` writable bytes.
    ///
    /// Fails on zero size, on sizes above [`MAX_REQUEST`], and on
    /// resource exhaustion; the heap state is unchanged on failure.
    pub fn allocate(&mut self, size: usize) -> HeapResult<NonNull<u8>> {
        if size == 0 || size > MAX_REQUEST {
            return Err(HeapError::InvalidRequest);
        }
        self.ensure_arena()?;

        let total = size + BlockHeader::SIZE;
        if total > TOP_BLOCK_SIZE {
            return self.allocate_large(total);
        }

        let Some(arena) = self.arena.as_mut() else {
            return Err(HeapError::NoMemory);
        };
        let block = arena.allocate(total, &mut self.ledger)?;
        // SAFETY: the payload of a block handed out by the arena is
        // never null.
        unsafe { Ok(NonNull::new_unchecked((*block).payload())) }
    }

    /// Hands out `count * size` zeroed bytes, rejecting products that
    /// overflow.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> HeapResult<NonNull<u8>> {
        let total = count.checked_mul(size).ok_or(HeapError::InvalidRequest)?;
        let payload = self.allocate(total)?;
        // SAFETY: allocate returned at least `total` writable bytes.
        unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };
        Ok(payload)
    }

    /// Releases `payload`.
    ///
    /// A null pointer is a no-op. A damaged header or a repeated free
    /// is ignored so one buggy client cannot take the heap down.
    ///
    /// # Safety
    ///
    /// `payload` must be null or a pointer obtained from this heap that
    /// has not been passed to `free` since.
    pub unsafe fn free(&mut self, payload: *mut u8) {
        if payload.is_null() {
            return;
        }
        let block = BlockHeader::from_payload(payload);
        if !(*block).canary_ok() {
            warn!("heap: free of {:p} with damaged header, ignoring", payload);
            return;
        }
        if (*block).is_free {
            warn!("heap: double free of {:p}, ignoring", payload);
            return;
        }

        if (*block).is_large {
            self.large.remove(block);
            self.ledger.retire(Pool::Large, (*block).size, false);
            let len = (*block).size;
            self.source.unmap(NonNull::new_unchecked(block as *mut u8), len);
            return;
        }

        let Some(arena) = self.arena.as_mut() else {
            warn!("heap: free of {:p} before initialization, ignoring", payload);
            return;
        };
        if !arena.contains(block as usize) {
            warn!("heap: free of {:p} outside the arena, ignoring", payload);
            return;
        }
        arena.release(block, &mut self.ledger);
    }

    /// Resizes the allocation behind `payload` to `size` bytes.
    ///
    /// A null `payload` allocates; a zero `size` frees and fails. If
    /// the current payload already covers `size`, the pointer is
    /// returned unchanged. A buddy block next tries to absorb its free
    /// right-hand buddies in place; only then does the heap fall back
    /// to allocate, copy, free. On failure the old block is untouched.
    ///
    /// # Safety
    ///
    /// `payload` must be null or a live pointer obtained from this
    /// heap.
    pub unsafe fn reallocate(&mut self, payload: *mut u8, size: usize) -> HeapResult<NonNull<u8>> {
        if size == 0 {
            self.free(payload);
            return Err(HeapError::InvalidRequest);
        }
        if payload.is_null() {
            return self.allocate(size);
        }
        if size > MAX_REQUEST {
            return Err(HeapError::InvalidRequest);
        }

        let block = BlockHeader::from_payload(payload);
        if !(*block).canary_ok() {
            warn!("heap: reallocate of {:p} with damaged header", payload);
            return Err(HeapError::CorruptedBlock);
        }
        if (*block).is_free {
            warn!("heap: reallocate of freed pointer {:p}", payload);
            return Err(HeapError::CorruptedBlock);
        }

        if (*block).payload_size() >= size {
            return Ok(NonNull::new_unchecked(payload));
        }

        let total = size + BlockHeader::SIZE;
        if !(*block).is_large && total <= TOP_BLOCK_SIZE {
            if let Some(arena) = self.arena.as_mut() {
                if let Some(target) = arena.growth_order(block, total) {
                    arena.grow_in_place(block, target, &mut self.ledger);
                    return Ok(NonNull::new_unchecked(payload));
                }
            }
        }

        let new_payload = self.allocate(size)?;
        let keep = cmp::min((*block).payload_size(), size);
        ptr::copy(payload, new_payload.as_ptr(), keep);
        self.free(payload);
        Ok(new_payload)
    }

    /// Blocks currently enrolled in a free list.
    pub fn free_blocks(&self) -> usize {
        self.ledger.free_blocks()
    }

    /// Payload bytes across all free blocks.
    pub fn free_bytes(&self) -> usize {
        self.ledger.free_bytes()
    }

    /// Blocks present in the heap's structures, free or in use.
    pub fn allocated_blocks(&self) -> usize {
        self.ledger.allocated_blocks()
    }

    /// Payload bytes across all enrolled blocks.
    pub fn allocated_bytes(&self) -> usize {
        self.ledger.allocated_bytes()
    }

    /// Bytes consumed by block headers.
    pub fn header_bytes(&self) -> usize {
        self.ledger.header_bytes()
    }

    /// Bytes of metadata preceding every payload.
    pub fn header_size(&self) -> usize {
        BlockHeader::SIZE
    }

    /// Point-in-time counter snapshot.
    pub fn stats(&self) -> crate::HeapStats {
        self.ledger.snapshot()
    }

    /// Initializes the arena on the first call that needs it. A failed
    /// attempt leaves the heap uninitialized; later calls retry.
    fn ensure_arena(&mut self) -> HeapResult {
        if self.arena.is_some() {
            return Ok(());
        }
        let arena = self.init_arena()?;
        self.arena = Some(arena);
        Ok(())
    }

    fn init_arena(&mut self) -> HeapResult<Arena> {
        use crate::buddy::ARENA_SIZE;

        // Bring the break to an arena-size boundary, then take the
        // arena itself. The two extensions are adjacent, so the second
        // one starts exactly at the boundary.
        let brk = self.source.current() as usize;
        let aligned = crate::align_up(brk, ARENA_SIZE);
        if aligned != brk {
            // SAFETY: the heap is the only mutator of the break per the
            // MemorySource contract.
            unsafe {
                self.source
                    .extend(aligned - brk)
                    .ok_or(HeapError::NoMemory)?;
            }
        }
        let base = unsafe { self.source.extend(ARENA_SIZE) }.ok_or_else(|| {
            debug!("heap: program break extension failed");
            HeapError::NoMemory
        })?;

        // SAFETY: base is the old break, now aligned, and the region
        // belongs to the heap for the process lifetime.
        Ok(unsafe { Arena::new(base.as_ptr() as usize, &mut self.ledger) })
    }

    fn allocate_large(&mut self, total: usize) -> HeapResult<NonNull<u8>> {
        let mapping = self.source.map(total).ok_or_else(|| {
            debug!("heap: mapping of {} bytes failed", total);
            HeapError::NoMemory
        })?;

        // SAFETY: the mapping is fresh, writable, and page aligned.
        let block = unsafe {
            BlockHeader::write(mapping.as_ptr(), total, ORDER_LARGE, false, true)
        };
        unsafe { self.large.insert_sorted(block) };
        self.ledger.enroll(Pool::Large, total, false);

        unsafe { Ok(NonNull::new_unchecked((*block).payload())) }
    }
}

// The heap owns every block it links; the raw pointers inside never
// leave its control.
unsafe impl<S: MemorySource + Send> Send for Heap<S> {}
