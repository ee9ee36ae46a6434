//! Test-only structural checks over the allocator's twin structures.
//!
//! `check_invariants` is the integrity contract of the allocator
//! object: tests call it after every operation, so any drift between
//! the slot list and the size heap is caught at the operation that
//! introduced it rather than at some later collapse.

use core::ptr::NonNull;

use std::vec::Vec;

use crate::allocator::{RegionProvider, SlotHeap};
use crate::chunk::CHUNK_SIZE;
use crate::slot::Header;

impl<P: RegionProvider> SlotHeap<P> {
    /// Base of the backing region.
    pub(crate) fn base_ptr(&self) -> NonNull<u8> {
        self.base.cast()
    }

    /// The slot list as `(chunks, is_free)`, lowest address first.
    pub(crate) fn snapshot(&self) -> Vec<(usize, bool)> {
        let mut slots = Vec::new();
        let mut cursor = Some(self.base);
        while let Some(h) = cursor {
            // SAFETY: list links only ever point at live headers.
            unsafe {
                slots.push(((*h.as_ptr()).chunks, (*h.as_ptr()).heap_index.is_some()));
                cursor = (*h.as_ptr()).next;
            }
        }
        slots
    }

    /// Total free chunks in the region.
    pub(crate) fn free_chunks(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|&&(_, free)| free)
            .map(|&(chunks, _)| chunks)
            .sum()
    }

    /// Assert every cross-structure invariant: the list tiles the
    /// region with consistent links, no two adjacent slots are free,
    /// free slots and heap entries reference each other exactly, and
    /// the heap keys are in max-heap order.
    pub(crate) fn check_invariants(&self) {
        let base = self.base_ptr().as_ptr() as usize;
        let total_chunks = self.capacity / CHUNK_SIZE;

        let mut cursor = Some(self.base);
        let mut expected_prev: Option<NonNull<Header>> = None;
        let mut sum = 0;
        let mut free_slots = 0;
        let mut prev_was_free = false;

        while let Some(h) = cursor {
            // Each header sits exactly where the previous slot ends.
            assert_eq!(h.as_ptr() as usize, base + sum * CHUNK_SIZE);

            // SAFETY: the header is inside the region we own.
            let (chunks, prev, next, heap_index) = unsafe {
                let r = h.as_ptr();
                ((*r).chunks, (*r).prev, (*r).next, (*r).heap_index)
            };

            assert!(chunks > 0);
            assert_eq!(prev, expected_prev);
            sum += chunks;
            assert!(sum <= total_chunks);

            match heap_index {
                Some(i) => {
                    assert!(!prev_was_free, "adjacent free slots were not coalesced");
                    assert!(i < self.heap.len());
                    assert_eq!(self.heap.entry(i), h);
                    prev_was_free = true;
                    free_slots += 1;
                }
                None => prev_was_free = false,
            }

            expected_prev = Some(h);
            cursor = next;
        }
        assert_eq!(sum, total_chunks);

        // Every heap entry belongs to exactly one free slot of the
        // list, and each parent key dominates its children.
        assert_eq!(self.heap.len(), free_slots);
        for i in 0..self.heap.len() {
            let entry = self.heap.entry(i);
            // SAFETY: checked above to be a live header of the list.
            assert_eq!(unsafe { (*entry.as_ptr()).heap_index }, Some(i));
            if i > 0 {
                assert!(self.heap.chunks_at((i - 1) / 2) >= self.heap.chunks_at(i));
            }
        }
    }
}
