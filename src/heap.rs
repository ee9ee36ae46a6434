//! Max-heap over the free slots, keyed by size in chunks.
//!
//! The heap lives in a host-provided buffer of header pointers, densely
//! packed in the classic implicit-tree layout. Every free header stores
//! its own entry index, so the list and the heap can find each other in
//! O(1) from either side. Keeping the *largest* free slot at the root
//! lets one comparison reject any request the region cannot hold, and
//! lets the fit search descend monotonically toward smaller slots that
//! still suffice.

use core::ptr::NonNull;

use crate::slot::Header;

const fn left_child(i: usize) -> usize {
    2 * i + 1
}

const fn right_child(i: usize) -> usize {
    2 * i + 2
}

const fn parent(i: usize) -> usize {
    (i - 1) / 2
}

pub(crate) struct SizeHeap {
    entries: NonNull<NonNull<Header>>,
    len: usize,
    capacity: usize,
}

impl SizeHeap {
    /// Wrap a host-provided entry buffer. The heap starts empty.
    ///
    /// # Safety
    ///
    /// `entries` must point to a buffer with room for `capacity`
    /// entries, exclusively owned by this heap until it is torn down.
    pub unsafe fn new(entries: NonNull<NonNull<Header>>, capacity: usize) -> SizeHeap {
        SizeHeap {
            entries,
            len: 0,
            capacity,
        }
    }

    /// The underlying entry buffer, for handing back to the host.
    pub fn buffer(&self) -> NonNull<NonNull<Header>> {
        self.entries
    }

    /// Number of free slots currently tracked.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Chunk count of the largest free slot, or 0 when none is free.
    pub fn root_chunks(&self) -> usize {
        if self.len() == 0 {
            0
        } else {
            self.chunks_at(0)
        }
    }

    pub(crate) fn entry(&self, i: usize) -> NonNull<Header> {
        debug_assert!(i < self.len);
        // SAFETY: entries below `len` are initialized header pointers.
        unsafe { *self.entries.as_ptr().add(i) }
    }

    pub(crate) fn chunks_at(&self, i: usize) -> usize {
        // SAFETY: the heap only holds pointers to live free headers.
        unsafe { (*self.entry(i).as_ptr()).chunks }
    }

    /// Point entry `i` at `header` and `header` back at entry `i`.
    pub fn replace(&mut self, i: usize, header: NonNull<Header>) {
        debug_assert!(i < self.len);
        // SAFETY: `i` is in bounds and `header` is a live header.
        unsafe {
            *self.entries.as_ptr().add(i) = header;
            (*header.as_ptr()).heap_index = Some(i);
        }
    }

    /// Append `header` as a new free entry and restore heap order.
    pub fn insert(&mut self, header: NonNull<Header>) {
        assert!(self.len < self.capacity);
        self.len += 1;
        self.replace(self.len - 1, header);
        self.sift_up(self.len - 1);
    }

    /// Drop entry `i`, marking its header occupied. The hole is plugged
    /// with the last entry, which is then sifted both ways (at least
    /// one is a no-op).
    pub fn remove(&mut self, i: usize) {
        debug_assert!(i < self.len);
        // SAFETY: entry `i` is a live header.
        unsafe {
            (*self.entry(i).as_ptr()).heap_index = None;
        }
        if i == self.len - 1 {
            self.len -= 1;
            return;
        }
        let last = self.entry(self.len - 1);
        self.replace(i, last);
        self.len -= 1;
        self.sift_up(i);
        self.sift_down(i);
    }

    fn swap(&mut self, i: usize, j: usize) {
        let a = self.entry(i);
        let b = self.entry(j);
        self.replace(i, b);
        self.replace(j, a);
    }

    /// Move entry `i` rootward while its key beats its parent's. Equal
    /// keys do not bubble.
    pub fn sift_up(&mut self, mut i: usize) {
        while i > 0 && self.chunks_at(parent(i)) < self.chunks_at(i) {
            self.swap(i, parent(i));
            i = parent(i);
        }
    }

    /// Move entry `i` leafward while a child's key strictly beats it;
    /// on a tie between the children the left one wins.
    pub fn sift_down(&mut self, mut i: usize) {
        loop {
            let mut largest = i;
            let left = left_child(i);
            let right = right_child(i);
            if left < self.len && self.chunks_at(left) > self.chunks_at(largest) {
                largest = left;
            }
            if right < self.len && self.chunks_at(right) > self.chunks_at(largest) {
                largest = right;
            }
            if largest == i {
                return;
            }
            self.swap(i, largest);
            i = largest;
        }
    }

    /// Locate a free slot of at least `fit` chunks: reject against the
    /// root in O(1), then descend toward a child that still fits,
    /// preferring the larger child (the left on ties). Stops at a node
    /// none of whose children suffice: a locally smallest sufficient
    /// slot, not necessarily the global best fit.
    pub fn peek_fit(&self, fit: usize) -> Option<NonNull<Header>> {
        if self.len == 0 || self.chunks_at(0) < fit {
            return None;
        }

        let mut i = 0;
        loop {
            let left = left_child(i);
            let right = right_child(i);
            let left_fits = left < self.len && self.chunks_at(left) >= fit;
            let right_fits = right < self.len && self.chunks_at(right) >= fit;
            i = match (left_fits, right_fits) {
                (true, true) => {
                    if self.chunks_at(left) >= self.chunks_at(right) {
                        left
                    } else {
                        right
                    }
                }
                (true, false) => left,
                (false, true) => right,
                (false, false) => return Some(self.entry(i)),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::boxed::Box;
    use std::vec::Vec;

    fn make_headers(sizes: &[usize]) -> Vec<Box<Header>> {
        sizes
            .iter()
            .map(|&chunks| {
                Box::new(Header {
                    chunks,
                    prev: None,
                    next: None,
                    heap_index: None,
                })
            })
            .collect()
    }

    /// Entry buffer + heap over it. The buffer must outlive the heap.
    fn make_heap(buf: &mut Vec<NonNull<Header>>) -> SizeHeap {
        unsafe { SizeHeap::new(NonNull::new(buf.as_mut_ptr()).unwrap(), buf.capacity()) }
    }

    fn assert_well_formed(heap: &SizeHeap) {
        for i in 0..heap.len() {
            assert_eq!(unsafe { (*heap.entry(i).as_ptr()).heap_index }, Some(i));
            if i > 0 {
                assert!(heap.chunks_at(parent(i)) >= heap.chunks_at(i));
            }
        }
    }

    #[test]
    fn empty_heap() {
        let mut buf = Vec::with_capacity(4);
        let heap = make_heap(&mut buf);
        assert_eq!(heap.len(), 0);
        assert_eq!(heap.root_chunks(), 0);
        assert_eq!(heap.peek_fit(1), None);
    }

    #[test]
    fn insert_keeps_the_largest_at_the_root() {
        let mut headers = make_headers(&[3, 8, 5, 1, 6]);
        let mut buf = Vec::with_capacity(8);
        let mut heap = make_heap(&mut buf);

        for h in &mut headers {
            heap.insert(NonNull::from(h.as_mut()));
            assert_well_formed(&heap);
        }
        assert_eq!(heap.len(), 5);
        assert_eq!(heap.root_chunks(), 8);
    }

    #[test]
    fn remove_replugs_the_hole() {
        let mut headers = make_headers(&[9, 7, 8, 3, 5]);
        let mut buf = Vec::with_capacity(8);
        let mut heap = make_heap(&mut buf);
        for h in &mut headers {
            heap.insert(NonNull::from(h.as_mut()));
        }

        // Drop the 7 out of the middle.
        let index = headers[1].heap_index.unwrap();
        heap.remove(index);

        assert_eq!(heap.len(), 4);
        assert_eq!(heap.root_chunks(), 9);
        assert_eq!(headers[1].heap_index, None);
        assert_well_formed(&heap);
    }

    #[test]
    fn remove_last_entry_is_trivial() {
        let mut headers = make_headers(&[4, 2]);
        let mut buf = Vec::with_capacity(4);
        let mut heap = make_heap(&mut buf);
        for h in &mut headers {
            heap.insert(NonNull::from(h.as_mut()));
        }

        heap.remove(1);
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.root_chunks(), 4);
        assert_eq!(headers[1].heap_index, None);
    }

    #[test]
    fn peek_fit_descends_to_a_tight_slot() {
        let mut headers = make_headers(&[8, 6]);
        let mut buf = Vec::with_capacity(4);
        let mut heap = make_heap(&mut buf);
        for h in &mut headers {
            heap.insert(NonNull::from(h.as_mut()));
        }

        // Small requests walk past the root down to the 6; a request
        // only the root can hold stays there; an oversized request is
        // rejected on the root comparison alone.
        assert_eq!(heap.peek_fit(3), Some(NonNull::from(headers[1].as_mut())));
        assert_eq!(heap.peek_fit(7), Some(NonNull::from(headers[0].as_mut())));
        assert_eq!(heap.peek_fit(9), None);
    }

    #[test]
    fn sift_down_prefers_the_left_child_on_ties() {
        let mut headers = make_headers(&[10, 9, 9, 1]);
        let mut buf = Vec::with_capacity(8);
        let mut heap = make_heap(&mut buf);
        for h in &mut headers {
            heap.insert(NonNull::from(h.as_mut()));
        }

        // Removing the root drops the 1 in its place; sifting down must
        // pick the left of the two equal 9s.
        heap.remove(0);
        assert_eq!(heap.entry(0), NonNull::from(headers[1].as_mut()));
        assert_well_formed(&heap);
    }
}
