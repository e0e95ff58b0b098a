//! Anonymous page mappings.
//!
//! Thin wrappers around the `mmap`/`munmap` syscalls, the only place the
//! engine talks to the operating system. Mappings are always private,
//! anonymous, and read-write; the kernel hands them back page-aligned and
//! zero-filled.

#![allow(unsafe_code)]

use core::ptr::{self, NonNull};

/// Size of one OS page, the unit of backing-store acquisition.
pub const PAGE_SIZE: usize = 4096;

/// Requests `len` bytes of anonymous private read-write memory.
///
/// Returns `None` when the kernel refuses the mapping; no state changes in
/// that case. The returned address is aligned to [`PAGE_SIZE`].
#[must_use]
pub fn map_anonymous(len: usize) -> Option<NonNull<u8>> {
    // SAFETY: an anonymous mapping with a null hint touches no existing
    // memory; the kernel either returns a fresh region or MAP_FAILED.
    let base = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return None;
    }
    NonNull::new(base.cast())
}

/// Returns a mapping to the kernel.
///
/// # Safety
///
/// `base` and `len` must describe exactly one live mapping previously
/// returned by [`map_anonymous`], and nothing may touch the region after
/// this call.
pub unsafe fn unmap(base: *mut u8, len: usize) {
    // The allocator never recovers from a failed munmap; the region was
    // already unlinked from all bookkeeping.
    // SAFETY: caller guarantees base/len name a live mapping we own.
    unsafe {
        libc::munmap(base.cast(), len);
    }
}
