//! The allocator facade: one backing region, the slot list tiling it,
//! and the size heap over the free slots, mutated together.
//!
//! Every operation starts by locating a slot (through the heap for an
//! allocation, through payload-to-header translation for a release or
//! resize) and ends with both structures consistent again: the list
//! still tiles the region, adjacent free slots are coalesced, and every
//! free header sits exactly where its heap entry says it does.

use core::alloc::Layout;
use core::ptr::NonNull;

use log::{debug, trace};

use crate::chunk::{self, CHUNK_SIZE};
use crate::heap::SizeHeap;
use crate::slot::Header;

/// Host of the raw memory the allocator lives in.
///
/// The allocator calls `obtain` exactly twice at construction, once for
/// the backing region and once for the heap's entry buffer, and
/// `reclaim` twice at teardown.
///
/// # Safety
///
/// `obtain` must return memory valid for reads and writes of
/// `layout.size()` bytes at `layout.align()` alignment, owned
/// exclusively by the caller until it is passed back to `reclaim`.
pub unsafe trait RegionProvider {
    /// Obtain `layout.size()` bytes aligned to `layout.align()`, or
    /// `None` if the host cannot supply them.
    fn obtain(&mut self, layout: Layout) -> Option<NonNull<u8>>;

    /// Take back memory previously handed out by `obtain`.
    ///
    /// # Safety
    ///
    /// `ptr` and `layout` must match an earlier `obtain` call exactly,
    /// and the memory must not be touched afterwards.
    unsafe fn reclaim(&mut self, ptr: NonNull<u8>, layout: Layout);
}

/// Why construction failed.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum InitError {
    /// The requested capacity rounds down to zero chunks.
    CapacityTooSmall,
    /// The host refused the backing region or the heap buffer.
    HostAllocation,
}

/// A fixed-capacity byte allocator over a single backing region.
///
/// The region is obtained once from the provider at construction and
/// returned on drop. Blocks of arbitrary byte sizes can be allocated,
/// resized, and released in any order; free neighbors coalesce eagerly.
///
/// ```
/// use core::alloc::Layout;
/// use core::ptr::NonNull;
///
/// use slotheap::{RegionProvider, SlotHeap};
///
/// struct System;
///
/// unsafe impl RegionProvider for System {
///     fn obtain(&mut self, layout: Layout) -> Option<NonNull<u8>> {
///         NonNull::new(unsafe { std::alloc::alloc(layout) })
///     }
///
///     unsafe fn reclaim(&mut self, ptr: NonNull<u8>, layout: Layout) {
///         std::alloc::dealloc(ptr.as_ptr(), layout)
///     }
/// }
///
/// let mut heap = SlotHeap::new(System, 64 * 1024).unwrap();
/// let block = heap.allocate(1000).unwrap();
/// unsafe { heap.release(block) };
/// ```
pub struct SlotHeap<P: RegionProvider> {
    pub(crate) provider: P,
    /// Base of the backing region; also the first slot's header.
    pub(crate) base: NonNull<Header>,
    /// Region size in bytes, a chunk multiple.
    pub(crate) capacity: usize,
    pub(crate) heap: SizeHeap,
}

impl<P: RegionProvider> SlotHeap<P> {
    /// Build an allocator over `capacity` bytes, rounded down to a
    /// chunk multiple, obtained from `provider`.
    pub fn new(mut provider: P, capacity: usize) -> Result<SlotHeap<P>, InitError> {
        let capacity = chunk::round_down(capacity);
        if capacity == 0 {
            return Err(InitError::CapacityTooSmall);
        }
        let total_chunks = capacity / CHUNK_SIZE;

        let region = provider
            .obtain(Self::region_layout(capacity))
            .ok_or(InitError::HostAllocation)?;

        // One heap entry per chunk is an upper bound on the number of
        // simultaneously free slots.
        let heap_buf = match provider.obtain(Self::heap_layout(total_chunks)) {
            Some(buf) => buf,
            None => {
                // SAFETY: `region` came from the matching `obtain` just
                // above and has not been used.
                unsafe { provider.reclaim(region, Self::region_layout(capacity)) };
                return Err(InitError::HostAllocation);
            }
        };

        // SAFETY: the region is chunk-aligned and at least one chunk
        // large, so its base is a valid header position.
        let base = region.cast::<Header>();
        unsafe {
            base.as_ptr().write(Header {
                chunks: total_chunks,
                prev: None,
                next: None,
                heap_index: None,
            });
        }

        // SAFETY: the buffer holds `total_chunks` entries and is owned
        // by this allocator from here on.
        let mut heap = unsafe { SizeHeap::new(heap_buf.cast(), total_chunks) };
        heap.insert(base);

        debug!(
            "region of {} chunks ({} bytes) at {:p}",
            total_chunks, capacity, base
        );

        Ok(SlotHeap {
            provider,
            base,
            capacity,
            heap,
        })
    }

    /// Bytes in the backing region, after rounding.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Payload bytes the single largest allocation could obtain right
    /// now, or 0 when no free slot can host one. A one-chunk free slot
    /// has no room past its header, so it counts for nothing here.
    pub fn largest_free(&self) -> usize {
        match self.heap.root_chunks() {
            0 => 0,
            chunks => (chunks - 1) * CHUNK_SIZE,
        }
    }

    /// Allocate `size` bytes. Returns the payload address, or `None`
    /// when no free slot can hold the request. Zero-byte requests are
    /// rejected here: they have no slot representation.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let want = chunk::num_chunks(size);
        if want == 0 {
            return None;
        }

        // The descent starts with the root comparison, which alone
        // rejects anything the region cannot currently hold.
        let slot = self.heap.peek_fit(want)?;

        // SAFETY: the heap only holds live free headers of this region.
        let payload = unsafe {
            if (*slot.as_ptr()).chunks == want {
                // Exact fit: the slot leaves the heap and keeps its
                // place in the list.
                self.heap.remove((*slot.as_ptr()).heap_index.unwrap());
                Header::payload(slot)
            } else {
                // Cut the request from the high end. The free remainder
                // keeps its address, links, and heap entry, so only its
                // shrunken key needs repair.
                let keep = (*slot.as_ptr()).chunks - want;
                let taken = Header::split(slot, keep);
                self.heap.sift_down((*slot.as_ptr()).heap_index.unwrap());
                Header::payload(taken)
            }
        };
        trace!("allocate({}) -> {} chunks at {:p}", size, want, payload);
        Some(payload)
    }

    /// Return the block at `payload` to the allocator, coalescing with
    /// free neighbors. Releasing a block whose slot is already free is
    /// a no-op.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by [`SlotHeap::allocate`] or
    /// [`SlotHeap::resize`] on this allocator, and the block must not
    /// be used afterwards.
    pub unsafe fn release(&mut self, payload: NonNull<u8>) {
        let slot = Header::from_payload(payload);
        let h = slot.as_ptr();
        if (*h).heap_index.is_some() {
            // Already free; tolerate the double release.
            return;
        }
        trace!("release {} chunks at {:p}", (*h).chunks, payload);

        let prev_free = match (*h).prev {
            Some(p) => Header::is_free(p),
            None => false,
        };
        let next_free = match (*h).next {
            Some(n) => Header::is_free(n),
            None => false,
        };

        match (prev_free, next_free) {
            (true, true) => {
                // Both neighbors fold into the predecessor. Sift its
                // grown key first; the successor's entry index is
                // re-read afterwards because the sift may have moved it.
                let prev = (*h).prev.unwrap();
                let next = (*h).next.unwrap();
                Header::absorb_next(prev);
                Header::absorb_next(prev);
                self.heap.sift_up((*prev.as_ptr()).heap_index.unwrap());
                self.heap.remove((*next.as_ptr()).heap_index.unwrap());
            }
            (true, false) => {
                let prev = (*h).prev.unwrap();
                Header::absorb_next(prev);
                self.heap.sift_up((*prev.as_ptr()).heap_index.unwrap());
            }
            (false, true) => {
                // The released slot takes over its successor's heap
                // entry; the merged key only grew.
                let next = (*h).next.unwrap();
                let index = (*next.as_ptr()).heap_index.unwrap();
                Header::absorb_next(slot);
                self.heap.replace(index, slot);
                self.heap.sift_up(index);
            }
            (false, false) => self.heap.insert(slot),
        }
    }

    /// Resize the block at `payload` to `size` bytes, in place when the
    /// successor slot allows it and by relocating otherwise. `None`
    /// from a grow means the request cannot be satisfied and the
    /// original block is untouched. `resize(None, size)` allocates;
    /// resizing to zero releases the block and returns `None`.
    ///
    /// # Safety
    ///
    /// `payload`, if present, must have been returned by
    /// [`SlotHeap::allocate`] or [`SlotHeap::resize`] on this
    /// allocator. A relocated or released block must not be used
    /// afterwards.
    pub unsafe fn resize(
        &mut self,
        payload: Option<NonNull<u8>>,
        size: usize,
    ) -> Option<NonNull<u8>> {
        let payload = match payload {
            Some(p) => p,
            None => return self.allocate(size),
        };
        let want = chunk::num_chunks(size);
        if want == 0 {
            self.release(payload);
            return None;
        }

        let slot = Header::from_payload(payload);
        let have = (*slot.as_ptr()).chunks;

        if want == have {
            return Some(payload);
        }
        if want < have {
            self.shrink_in_place(slot, want);
            return Some(payload);
        }

        // Grow. The successor can donate space if it is free and large
        // enough; otherwise the block has to move.
        match (*slot.as_ptr()).next {
            Some(next)
                if Header::is_free(next) && have + (*next.as_ptr()).chunks >= want =>
            {
                self.grow_into_next(slot, next, want);
                Some(payload)
            }
            _ => self.relocate(slot, size),
        }
    }

    /// Give the tail of an occupied slot back as free space: keep
    /// `keep` chunks and either merge the remainder into a free
    /// successor or stand it up as a new free slot.
    unsafe fn shrink_in_place(&mut self, slot: NonNull<Header>, keep: usize) {
        trace!(
            "shrink {} -> {} chunks at {:p}",
            (*slot.as_ptr()).chunks,
            keep,
            Header::payload(slot)
        );
        let remainder = Header::split(slot, keep);
        match (*remainder.as_ptr()).next {
            Some(upper) if Header::is_free(upper) => {
                // The freed tail and the free successor become one slot
                // under the successor's heap entry; the key grew.
                let index = (*upper.as_ptr()).heap_index.unwrap();
                Header::absorb_next(remainder);
                self.heap.replace(index, remainder);
                self.heap.sift_up(index);
            }
            _ => self.heap.insert(remainder),
        }
    }

    /// Extend an occupied slot into its free successor, which has
    /// already been checked to donate enough chunks.
    unsafe fn grow_into_next(&mut self, slot: NonNull<Header>, next: NonNull<Header>, want: usize) {
        trace!(
            "grow {} -> {} chunks at {:p}",
            (*slot.as_ptr()).chunks,
            want,
            Header::payload(slot)
        );
        let combined = (*slot.as_ptr()).chunks + (*next.as_ptr()).chunks;
        let index = (*next.as_ptr()).heap_index.unwrap();
        if combined == want {
            // The successor is consumed whole.
            self.heap.remove(index);
            Header::absorb_next(slot);
        } else {
            // The successor's low chunks are consumed; the rest
            // re-forms above the grown slot under the same heap entry,
            // with a strictly smaller key, so the entry sifts down.
            Header::absorb_next(slot);
            let remainder = Header::split(slot, want);
            self.heap.replace(index, remainder);
            self.heap.sift_down(index);
        }
    }

    /// Move the block to a fresh slot of `size` bytes. On failure the
    /// original block is left untouched.
    unsafe fn relocate(&mut self, slot: NonNull<Header>, size: usize) -> Option<NonNull<u8>> {
        let new_payload = self.allocate(size)?;
        let old_payload = Header::payload(slot);
        // The whole old payload moves, trailing bytes included; the new
        // slot spans more chunks than the old one, so it always fits.
        let bytes = ((*slot.as_ptr()).chunks - 1) * CHUNK_SIZE;
        core::ptr::copy_nonoverlapping(old_payload.as_ptr(), new_payload.as_ptr(), bytes);
        self.release(old_payload);
        trace!("relocate {:p} -> {:p}", old_payload, new_payload);
        Some(new_payload)
    }

    fn region_layout(capacity: usize) -> Layout {
        // `capacity` is a nonzero chunk multiple; this cannot fail.
        Layout::from_size_align(capacity, CHUNK_SIZE).unwrap()
    }

    fn heap_layout(total_chunks: usize) -> Layout {
        Layout::array::<NonNull<Header>>(total_chunks).unwrap()
    }
}

impl<P: RegionProvider> Drop for SlotHeap<P> {
    fn drop(&mut self) {
        debug!("returning region at {:p}", self.base);
        let total_chunks = self.capacity / CHUNK_SIZE;
        // SAFETY: both buffers came out of `obtain` in `new` with these
        // exact layouts and are not touched again.
        unsafe {
            self.provider
                .reclaim(self.heap.buffer().cast(), Self::heap_layout(total_chunks));
            self.provider
                .reclaim(self.base.cast(), Self::region_layout(self.capacity));
        }
    }
}
