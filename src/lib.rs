//! A fixed-capacity byte allocator over a single backing region.
//!
//! The region is obtained once from a [`RegionProvider`] and tiled end
//! to end by slots, each led by an in-band header. Two structures
//! describe the same state and every operation keeps them consistent
//! with each other:
//!
//!   * the address-ordered doubly linked list of slot headers, and
//!   * a max-heap over the free slots keyed by size in chunks, through
//!     which a fitting slot is found in O(log F) and an oversized
//!     request is rejected on a single root comparison.
//!
//! Free neighbors coalesce eagerly on release; allocation cuts from the
//! high end of a free slot so the remainder keeps its heap entry; and
//! resize grows or shrinks in place whenever the neighboring slot
//! allows it, relocating only as a last resort.
//!
//! The allocator is single-threaded and non-reentrant. Wrap it in a
//! lock externally if it must be shared.

#![no_std]

#[cfg(test)]
extern crate std;

mod allocator;
#[cfg(test)]
mod check;
mod chunk;
mod heap;
mod slot;

pub use allocator::{InitError, RegionProvider, SlotHeap};
pub use chunk::{num_chunks, round_down, CHUNK_SIZE};
