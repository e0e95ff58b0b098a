//! ABI layer for the heap interface (`malloc`, `free`, `calloc`, `realloc`).
//!
//! All four symbols funnel into one process-wide heap guarded by a single
//! mutex. The engine itself is single-threaded; the coarse lock is what
//! makes the exported surface safe for threaded callers.

use std::ffi::c_void;
use std::ptr;

use pagebin_core::Heap;
use parking_lot::Mutex;

/// Process-wide heap instance.
///
/// `Heap::new` and `Mutex::new` are const, so the heap exists before the
/// first call and no lazy initialisation runs inside an allocation path.
static HEAP: Mutex<Heap> = Mutex::new(Heap::new());

// ---------------------------------------------------------------------------
// malloc
// ---------------------------------------------------------------------------

/// POSIX `malloc` -- allocates `size` bytes of uninitialized memory.
///
/// Returns a pointer to at least `size` writable bytes, or null on failure.
/// A zero-byte request returns null (POSIX allows either null or a unique
/// pointer; this allocator picks null).
///
/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    match HEAP.lock().allocate(size) {
        Some(block) => block.as_ptr().cast(),
        None => ptr::null_mut(),
    }
}

// ---------------------------------------------------------------------------
// free
// ---------------------------------------------------------------------------

/// POSIX `free` -- releases memory previously allocated by `malloc`,
/// `calloc`, or `realloc`.
///
/// If `ptr` is null, no operation is performed. A pointer the heap does not
/// recognize is silently ignored.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by a previous call to `malloc`,
/// `calloc`, or `realloc` that has not been freed already.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    let _ = HEAP.lock().release(ptr.cast());
}

// ---------------------------------------------------------------------------
// calloc
// ---------------------------------------------------------------------------

/// POSIX `calloc` -- allocates zeroed memory for an array of `nmemb`
/// elements of `size` bytes each.
///
/// Returns null if either operand is zero, if the multiplication overflows,
/// or if the allocation fails.
///
/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    match HEAP.lock().allocate_zeroed(nmemb, size) {
        Some(block) => block.as_ptr().cast(),
        None => ptr::null_mut(),
    }
}

// ---------------------------------------------------------------------------
// realloc
// ---------------------------------------------------------------------------

/// POSIX `realloc` -- changes the size of a previously allocated block.
///
/// - If `ptr` is null, behaves like `malloc(size)`.
/// - If `size` is 0 and `ptr` is non-null, behaves like `free(ptr)` and
///   returns null.
/// - When the existing block already fits the new size class, the same
///   pointer comes back; otherwise the leading bytes move to a new block
///   and the old one is freed. On failure the old block is untouched and
///   the call returns null.
///
/// # Safety
///
/// `ptr` must be null or a pointer previously returned by `malloc`,
/// `calloc`, or `realloc`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: caller guarantees ptr is null or a live pointer this heap
    // issued, which is exactly the engine's resize contract.
    match unsafe { HEAP.lock().resize(ptr.cast(), size) } {
        Some(block) => block.as_ptr().cast(),
        None => ptr::null_mut(),
    }
}
