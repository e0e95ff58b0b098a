//! The heap engine.
//!
//! [`Heap`] owns all allocator state: one page-list head per size class, the
//! large-region list, and the accounting counters. The four public
//! operations (allocate, release, zeroed allocate, resize) are methods on
//! it; the process-wide singleton and its lock live in the ABI crate.
//!
//! Pointer classification on release and resize walks the large-region list
//! first, then scans the class page lists for a page covering the address.
//! Matching a large region is pure address comparison and scanning pages
//! only compares ranges, so classification never dereferences memory the
//! heap does not own, whatever the caller passes in.

#![allow(unsafe_code)]

use core::ptr::{self, NonNull};

use crate::large::LargeList;
use crate::page::{CellRelease, PageHeader};
use crate::size_class::{self, NUM_SIZE_CLASSES};
use crate::stats::{HeapStats, StatsSnapshot};

/// What a release call did with its pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Null pointer; nothing to do.
    Null,
    /// Small cell threaded back onto its page's free list.
    SmallFreed,
    /// Large region unlinked and unmapped.
    LargeUnmapped,
    /// Pointer already heads its page's free list (double release); ignored.
    DoubleFree,
    /// Pointer not recognized as one of ours; ignored.
    Foreign,
}

/// A size-class segregated heap over anonymous page mappings.
///
/// Small requests pop a cell from the first page of their class with a free
/// cell, provisioning a fresh page when every page is full. Large requests
/// map a dedicated region. Pages live for the heap's lifetime; regions are
/// unmapped on release.
///
/// Not internally synchronized: callers hold `&mut Heap` for every
/// operation. Wrap it in a mutex for shared use.
pub struct Heap {
    /// Head of the page list per size class; pages prepend.
    class_pages: [*mut PageHeader; NUM_SIZE_CLASSES],
    /// Live large regions.
    large: LargeList,
    stats: HeapStats,
}

// SAFETY: every page and region the heap references is an anonymous mapping
// it owns exclusively; no pointer aliases state outside the heap. Access is
// externally synchronized through &mut self.
unsafe impl Send for Heap {}

impl Heap {
    /// An empty heap. No memory is mapped until the first allocation.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            class_pages: [ptr::null_mut(); NUM_SIZE_CLASSES],
            large: LargeList::new(),
            stats: HeapStats::new(),
        }
    }

    /// Allocates `n` writable bytes.
    ///
    /// Returns `None` for `n == 0` and on OS mapping failure. The returned
    /// block's usable capacity is the cell size of `n`'s class (small) or
    /// the mapped region minus its header (large); [`Heap::capacity_of`]
    /// recovers it.
    pub fn allocate(&mut self, n: usize) -> Option<NonNull<u8>> {
        if n == 0 {
            return None;
        }
        match size_class::class_for(n) {
            Some(class) => self.allocate_small(class),
            None => self.allocate_large(n),
        }
    }

    /// Allocates `count * size` bytes and zeroes them.
    ///
    /// Returns `None` when either operand is zero, on multiplicative
    /// overflow, and on mapping failure.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        if count == 0 || size == 0 {
            return None;
        }
        let total = count.checked_mul(size)?;
        let block = self.allocate(total)?;
        // Reused cells carry stale bytes; fresh mappings are zero already
        // but are not distinguished here.
        // SAFETY: the block was just issued with capacity >= total.
        unsafe { ptr::write_bytes(block.as_ptr(), 0, total) };
        Some(block)
    }

    /// Releases a pointer previously returned by this heap.
    ///
    /// Null is a no-op. A pointer the classifier does not recognize is
    /// ignored; the detectable head-of-list double release is ignored too.
    /// The outcome reports which path ran; the ABI layer discards it.
    pub fn release(&mut self, ptr: *mut u8) -> ReleaseOutcome {
        if ptr.is_null() {
            return ReleaseOutcome::Null;
        }
        if self.large.release(ptr) {
            self.stats.large_released += 1;
            return ReleaseOutcome::LargeUnmapped;
        }
        let addr = ptr as usize;
        for class in 0..NUM_SIZE_CLASSES {
            let mut page = self.class_pages[class];
            while !page.is_null() {
                // SAFETY: class lists hold only pages this heap provisioned,
                // and pages are never unmapped.
                let header = unsafe { &mut *page };
                if header.contains(addr) {
                    return match header.release_cell(addr) {
                        CellRelease::Freed => {
                            self.stats.small_released += 1;
                            ReleaseOutcome::SmallFreed
                        }
                        CellRelease::AlreadyFree => {
                            self.stats.double_releases_ignored += 1;
                            ReleaseOutcome::DoubleFree
                        }
                        CellRelease::NotACell => {
                            self.stats.foreign_releases_ignored += 1;
                            ReleaseOutcome::Foreign
                        }
                    };
                }
                page = header.next();
            }
        }
        self.stats.foreign_releases_ignored += 1;
        ReleaseOutcome::Foreign
    }

    /// Full usable capacity behind a pointer this heap issued.
    ///
    /// Small cells report their class's cell size; large regions report the
    /// mapped length minus the region header. `None` for null and for
    /// pointers the classifier does not recognize.
    #[must_use]
    pub fn capacity_of(&self, ptr: *mut u8) -> Option<usize> {
        if ptr.is_null() {
            return None;
        }
        if let Some(capacity) = self.large.capacity_of(ptr) {
            return Some(capacity);
        }
        let addr = ptr as usize;
        for class in 0..NUM_SIZE_CLASSES {
            let mut page = self.class_pages[class];
            while !page.is_null() {
                // SAFETY: class lists hold only live pages of this heap.
                let header = unsafe { &*page };
                if header.contains(addr) {
                    return Some(header.block_size());
                }
                page = header.next();
            }
        }
        None
    }

    /// Resizes the block at `ptr` to hold at least `n` bytes.
    ///
    /// Null degenerates to [`Heap::allocate`]; `n == 0` degenerates to
    /// [`Heap::release`] and returns `None`. When the block already fits
    /// (same size class, or a large region with room) the pointer comes back
    /// unchanged. Otherwise the contents move: allocate, copy the leading
    /// `min(old capacity, n)` bytes, release the old block. On allocation
    /// failure the old block stays intact and the call returns `None`.
    ///
    /// A pointer the classifier does not recognize yields a fresh block with
    /// unrelated contents.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer previously issued by this heap.
    /// A foreign pointer that happens to land inside one of the heap's pages
    /// would be copied from beyond what the caller owns.
    pub unsafe fn resize(&mut self, ptr: *mut u8, n: usize) -> Option<NonNull<u8>> {
        if ptr.is_null() {
            return self.allocate(n);
        }
        if n == 0 {
            self.release(ptr);
            return None;
        }
        let Some(capacity) = self.capacity_of(ptr) else {
            return self.allocate(n);
        };
        if block_still_fits(capacity, n) {
            return NonNull::new(ptr);
        }
        let fresh = self.allocate(n)?;
        let copy = capacity.min(n);
        // SAFETY: `ptr` is good for `capacity` bytes per the caller
        // contract, `fresh` for `n`, `copy` is within both, and the two
        // blocks are disjoint.
        unsafe { ptr::copy_nonoverlapping(ptr, fresh.as_ptr(), copy) };
        self.release(ptr);
        Some(fresh)
    }

    /// Current accounting counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn allocate_small(&mut self, class: usize) -> Option<NonNull<u8>> {
        let mut page = self.class_pages[class];
        while !page.is_null() {
            // SAFETY: class lists hold only live pages of this heap.
            let header = unsafe { &mut *page };
            if let Some(cell) = header.pop_cell() {
                self.stats.small_allocated += 1;
                return Some(cell);
            }
            page = header.next();
        }
        // Every page of the class is full; provision a fresh one.
        let Some(fresh) = PageHeader::provision(class) else {
            self.stats.oom_failures += 1;
            return None;
        };
        self.stats.pages_provisioned += 1;
        // SAFETY: `fresh` is a fully initialized page we exclusively own.
        let header = unsafe { &mut *fresh.as_ptr() };
        header.set_next(self.class_pages[class]);
        self.class_pages[class] = fresh.as_ptr();
        let cell = header.pop_cell();
        debug_assert!(cell.is_some(), "a fresh page always has cells");
        self.stats.small_allocated += 1;
        cell
    }

    fn allocate_large(&mut self, n: usize) -> Option<NonNull<u8>> {
        let Some(block) = self.large.allocate(n) else {
            self.stats.oom_failures += 1;
            return None;
        };
        self.stats.large_allocated += 1;
        Some(block)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a block of `capacity` bytes can keep serving a request for `n`.
fn block_still_fits(capacity: usize, n: usize) -> bool {
    match (size_class::class_for(capacity), size_class::class_for(n)) {
        // Same class: the cell already fits the request exactly as well as a
        // reallocation would.
        (Some(old_class), Some(new_class)) => old_class == new_class,
        // Both large: keep the region while the mapping has room.
        (None, None) => n <= capacity,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::PAGE_SIZE;
    use crate::size_class::MAX_SMALL_SIZE;

    #[test]
    fn test_allocate_zero_returns_none() {
        let mut heap = Heap::new();
        assert!(heap.allocate(0).is_none());
        assert_eq!(heap.stats().pages_provisioned, 0);
    }

    #[test]
    fn test_allocate_small_basic() {
        let mut heap = Heap::new();
        let block = heap.allocate(100).unwrap();
        assert_eq!(heap.capacity_of(block.as_ptr()), Some(128));
        let snap = heap.stats();
        assert_eq!(snap.small_allocated, 1);
        assert_eq!(snap.pages_provisioned, 1);
    }

    #[test]
    fn test_allocate_large_basic() {
        let mut heap = Heap::new();
        let block = heap.allocate(MAX_SMALL_SIZE + 1).unwrap();
        let capacity = heap.capacity_of(block.as_ptr()).unwrap();
        assert!(capacity >= MAX_SMALL_SIZE + 1);
        assert_eq!(heap.stats().large_allocated, 1);
        assert_eq!(heap.release(block.as_ptr()), ReleaseOutcome::LargeUnmapped);
        assert_eq!(heap.stats().large_live(), 0);
    }

    #[test]
    fn test_release_null_noop() {
        let mut heap = Heap::new();
        assert_eq!(heap.release(ptr::null_mut()), ReleaseOutcome::Null);
    }

    #[test]
    fn test_release_foreign_ignored() {
        let mut heap = Heap::new();
        let local = 42u64;
        let foreign = &local as *const u64 as *mut u8;
        assert_eq!(heap.release(foreign), ReleaseOutcome::Foreign);
        assert_eq!(heap.stats().foreign_releases_ignored, 1);
    }

    #[test]
    fn test_release_then_reallocate_is_lifo() {
        let mut heap = Heap::new();
        let first = heap.allocate(32).unwrap();
        let second = heap.allocate(32).unwrap();
        assert_ne!(first, second);

        assert_eq!(heap.release(second.as_ptr()), ReleaseOutcome::SmallFreed);
        assert_eq!(heap.allocate(32), Some(second));
        // `first` is still live and untouched by the churn.
        assert_eq!(heap.capacity_of(first.as_ptr()), Some(32));
    }

    #[test]
    fn test_double_release_head_detected() {
        let mut heap = Heap::new();
        let block = heap.allocate(16).unwrap();
        assert_eq!(heap.release(block.as_ptr()), ReleaseOutcome::SmallFreed);
        assert_eq!(heap.release(block.as_ptr()), ReleaseOutcome::DoubleFree);
        assert_eq!(heap.stats().double_releases_ignored, 1);
    }

    #[test]
    fn test_release_mid_cell_pointer_ignored() {
        let mut heap = Heap::new();
        let block = heap.allocate(64).unwrap();
        // SAFETY: one past the block start, still inside the 64-byte cell.
        let inside = unsafe { block.as_ptr().add(1) };
        assert_eq!(heap.release(inside), ReleaseOutcome::Foreign);
        // The real pointer still releases fine.
        assert_eq!(heap.release(block.as_ptr()), ReleaseOutcome::SmallFreed);
    }

    #[test]
    fn test_exhausting_a_page_provisions_another() {
        let mut heap = Heap::new();
        // 1024-byte cells: three per page.
        let per_page = (PAGE_SIZE - PageHeader::CELLS_START) / 1024;
        let blocks: Vec<_> = (0..per_page + 1)
            .map(|_| heap.allocate(1024).unwrap())
            .collect();
        assert_eq!(heap.stats().pages_provisioned, 2);
        for (a, block) in blocks.iter().enumerate() {
            for other in &blocks[a + 1..] {
                assert_ne!(block, other);
            }
        }
    }

    #[test]
    fn test_allocate_zeroed_wipes_reused_cell() {
        let mut heap = Heap::new();
        let dirty = heap.allocate(64).unwrap();
        // SAFETY: the cell holds 64 writable bytes.
        unsafe { dirty.as_ptr().write_bytes(0xFF, 64) };
        heap.release(dirty.as_ptr());

        let zeroed = heap.allocate_zeroed(16, 4).unwrap();
        assert_eq!(zeroed, dirty, "same class reuses the released cell");
        for i in 0..64 {
            // SAFETY: 64 bytes were just allocated and zeroed.
            assert_eq!(unsafe { zeroed.as_ptr().add(i).read() }, 0);
        }
    }

    #[test]
    fn test_allocate_zeroed_rejects_zero_and_overflow() {
        let mut heap = Heap::new();
        assert!(heap.allocate_zeroed(0, 8).is_none());
        assert!(heap.allocate_zeroed(8, 0).is_none());
        assert!(heap.allocate_zeroed(usize::MAX, 2).is_none());
        assert_eq!(heap.stats().pages_provisioned, 0);
    }

    #[test]
    fn test_resize_null_allocates() {
        let mut heap = Heap::new();
        // SAFETY: null is a valid resize input.
        let block = unsafe { heap.resize(ptr::null_mut(), 100) }.unwrap();
        assert_eq!(heap.capacity_of(block.as_ptr()), Some(128));
    }

    #[test]
    fn test_resize_zero_releases() {
        let mut heap = Heap::new();
        let block = heap.allocate(100).unwrap();
        // SAFETY: `block` was issued by this heap.
        assert!(unsafe { heap.resize(block.as_ptr(), 0) }.is_none());
        assert_eq!(heap.stats().small_released, 1);
    }

    #[test]
    fn test_resize_same_class_keeps_pointer() {
        let mut heap = Heap::new();
        let block = heap.allocate(20).unwrap();
        // 20 and 25 both classify to 32 bytes.
        // SAFETY: `block` was issued by this heap.
        let resized = unsafe { heap.resize(block.as_ptr(), 25) }.unwrap();
        assert_eq!(resized, block);
        assert_eq!(heap.stats().small_allocated, 1);
    }

    #[test]
    fn test_resize_moves_across_classes_and_copies() {
        let mut heap = Heap::new();
        let block = heap.allocate(16).unwrap();
        // SAFETY: the cell holds 16 writable bytes.
        unsafe { block.as_ptr().write_bytes(0x5C, 16) };
        // SAFETY: `block` was issued by this heap.
        let resized = unsafe { heap.resize(block.as_ptr(), 300) }.unwrap();
        assert_ne!(resized, block);
        for i in 0..16 {
            // SAFETY: the new block holds at least 300 bytes.
            assert_eq!(unsafe { resized.as_ptr().add(i).read() }, 0x5C);
        }
        let snap = heap.stats();
        assert_eq!(snap.small_allocated, 2);
        assert_eq!(snap.small_released, 1);
    }

    #[test]
    fn test_resize_large_with_room_keeps_pointer() {
        let mut heap = Heap::new();
        let block = heap.allocate(5000).unwrap();
        let capacity = heap.capacity_of(block.as_ptr()).unwrap();
        // SAFETY: `block` was issued by this heap.
        let resized = unsafe { heap.resize(block.as_ptr(), capacity) }.unwrap();
        assert_eq!(resized, block);
        assert_eq!(heap.stats().large_allocated, 1);
    }

    #[test]
    fn test_resize_large_to_small_moves() {
        let mut heap = Heap::new();
        let block = heap.allocate(2000).unwrap();
        // SAFETY: the region holds at least 2000 writable bytes.
        unsafe { block.as_ptr().write_bytes(0x3D, 2000) };
        // SAFETY: `block` was issued by this heap.
        let resized = unsafe { heap.resize(block.as_ptr(), 64) }.unwrap();
        assert_ne!(resized, block);
        for i in 0..64 {
            // SAFETY: the new cell holds 64 bytes.
            assert_eq!(unsafe { resized.as_ptr().add(i).read() }, 0x3D);
        }
        assert_eq!(heap.stats().large_released, 1);
    }

    #[test]
    fn test_resize_unknown_pointer_allocates_fresh() {
        let mut heap = Heap::new();
        let local = 7u64;
        let foreign = &local as *const u64 as *mut u8;
        // SAFETY: the pointer is not inside any heap page, so the classifier
        // rejects it before any copy.
        let block = unsafe { heap.resize(foreign, 48) }.unwrap();
        assert_ne!(block.as_ptr(), foreign);
        assert_eq!(heap.capacity_of(block.as_ptr()), Some(64));
    }

    #[test]
    fn test_block_still_fits() {
        assert!(block_still_fits(64, 40)); // 40 classifies to 64
        assert!(block_still_fits(64, 64));
        assert!(!block_still_fits(64, 65));
        assert!(!block_still_fits(64, 32)); // shrink across classes moves
        assert!(block_still_fits(8168, 5000)); // large with room
        assert!(!block_still_fits(8168, 9000)); // large without room
        assert!(!block_still_fits(8168, 512)); // large to small moves
    }
}
