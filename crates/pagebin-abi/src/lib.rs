//! # pagebin-abi
//!
//! ABI-compatible `extern "C"` boundary for the pagebin heap.
//!
//! This crate produces a `cdylib` exposing `malloc`, `free`, `calloc`, and
//! `realloc` symbols over a single process-wide [`pagebin_core::Heap`].
//! Preload it into a target process, no recompilation needed:
//!
//! ```bash,ignore
//! LD_PRELOAD=libpagebin_abi.so ./your_program
//! ```
//!
//! # Architecture
//!
//! ```text
//! C caller -> ABI entry (this crate) -> global lock -> Heap engine -> return
//! ```
//!
//! No configuration, no environment variables, no emitted diagnostics: every
//! failure surfaces as a null return, exactly as the POSIX contract allows.

// Gated behind cfg(not(test)) because this module exports #[no_mangle]
// symbols (malloc, free, calloc, realloc) that would shadow the system
// allocator in the test binary, causing infinite recursion.
#[cfg(not(test))]
pub mod malloc_abi;
