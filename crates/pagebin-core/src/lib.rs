//! # pagebin-core
//!
//! A size-class segregated heap engine backed directly by anonymous page
//! mappings. Small requests (up to 1 KiB) are served from fixed-size cells
//! carved out of single OS pages; larger requests get a dedicated multi-page
//! region that is unmapped again on release.
//!
//! The engine is a single owned value, [`Heap`]. The four-function C surface
//! (`malloc`/`free`/`calloc`/`realloc`) lives in the `pagebin-abi` crate and
//! forwards to a process-wide `Heap` behind one mutex.
//!
//! # Architecture
//!
//! - **Size classifier** (`size_class`): request size to power-of-two class
//! - **OS layer** (`os`): anonymous private read-write mappings
//! - **Pages** (`page`): per-page header plus an offset-linked cell free list
//! - **Regions** (`large`): doubly-linked list of whole-region mappings
//! - **Heap** (`heap`): allocation, pointer classification, release, resize
//! - **Stats** (`stats`): per-heap accounting counters
//!
//! Raw memory manipulation is confined to the modules that own it; the crate
//! denies `unsafe` everywhere else.

#![deny(unsafe_code)]

pub mod heap;
pub mod large;
pub mod os;
pub mod page;
pub mod size_class;
pub mod stats;

pub use heap::{Heap, ReleaseOutcome};
pub use os::PAGE_SIZE;
pub use stats::StatsSnapshot;
