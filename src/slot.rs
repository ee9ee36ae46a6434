//! In-band slot headers and the address-ordered slot list.
//!
//! Slots tile the backing region end to end with no gaps. Each one
//! starts with a [`Header`] written directly into the region; the
//! doubly linked list threaded through the headers *is* the record of
//! where every slot begins and ends.

use core::ptr::NonNull;

use crate::chunk::CHUNK_SIZE;

/// Record at the start of every slot. The record is smaller than a
/// chunk but claims the slot's whole first chunk; the payload handed to
/// clients begins at the next chunk boundary.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct Header {
    /// Total chunks in this slot, including the chunk holding this
    /// header.
    pub chunks: usize,
    /// Neighbor at the next lower address, if any.
    pub prev: Option<NonNull<Header>>,
    /// Neighbor at the next higher address, if any.
    pub next: Option<NonNull<Header>>,
    /// `Some(i)` iff the slot is free and entry `i` of the size heap
    /// points back here. `None` marks the slot occupied; this one field
    /// is both the occupancy flag and the heap back-pointer.
    pub heap_index: Option<usize>,
}

impl Header {
    /// Address of the header one past this slot. For the last slot of
    /// the region this is one past the region's end.
    ///
    /// # Safety
    ///
    /// `this` must point to a live header of a slot inside the backing
    /// region.
    pub unsafe fn next_header(this: NonNull<Header>) -> NonNull<Header> {
        let raw = this
            .as_ptr()
            .cast::<u8>()
            .add((*this.as_ptr()).chunks * CHUNK_SIZE);
        NonNull::new_unchecked(raw.cast())
    }

    /// First payload byte of the slot at `this`: the chunk boundary
    /// one chunk past the header, so every payload address is aligned
    /// to `CHUNK_SIZE`.
    ///
    /// # Safety
    ///
    /// `this` must point to a live header of a slot inside the backing
    /// region.
    pub unsafe fn payload(this: NonNull<Header>) -> NonNull<u8> {
        NonNull::new_unchecked(this.as_ptr().cast::<u8>().add(CHUNK_SIZE))
    }

    /// Recover the header from a payload address.
    ///
    /// # Safety
    ///
    /// `payload` must have been produced by [`Header::payload`] for a
    /// slot still inside the backing region.
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Header> {
        NonNull::new_unchecked(payload.as_ptr().sub(CHUNK_SIZE).cast::<Header>())
    }

    /// Whether the slot at `this` is currently free.
    ///
    /// # Safety
    ///
    /// `this` must point to a live header.
    pub unsafe fn is_free(this: NonNull<Header>) -> bool {
        (*this.as_ptr()).heap_index.is_some()
    }

    /// Cut the slot at `this` down to `keep` chunks and stand the
    /// remainder up as a new slot immediately above, linked between
    /// `this` and its old successor. The remainder is born occupied;
    /// heap bookkeeping for whichever side is free stays with the
    /// caller.
    ///
    /// # Safety
    ///
    /// `this` must point to a live header with `chunks > keep > 0`, and
    /// no other reference into the list may be live.
    pub unsafe fn split(this: NonNull<Header>, keep: usize) -> NonNull<Header> {
        let h = this.as_ptr();
        debug_assert!(keep > 0 && keep < (*h).chunks);

        let rest = (*h).chunks - keep;
        (*h).chunks = keep;

        // SAFETY: the remainder's chunks lie inside the region, and any
        // chunk boundary is a valid, aligned header position.
        let new = Self::next_header(this);
        new.as_ptr().write(Header {
            chunks: rest,
            prev: Some(this),
            next: (*h).next,
            heap_index: None,
        });

        if let Some(up) = (*h).next {
            (*up.as_ptr()).prev = Some(new);
        }
        (*h).next = Some(new);

        new
    }

    /// Absorb the immediate successor into the slot at `this`,
    /// extending `chunks` over it and unlinking it from the list. The
    /// successor's heap bookkeeping stays with the caller.
    ///
    /// # Safety
    ///
    /// `this` must point to a live header with a successor, and no
    /// other reference into the list may be live.
    pub unsafe fn absorb_next(this: NonNull<Header>) {
        let h = this.as_ptr();
        let next = (*h).next.unwrap();
        let n = next.as_ptr();

        (*h).chunks += (*n).chunks;
        (*h).next = (*n).next;
        if let Some(up) = (*n).next {
            (*up.as_ptr()).prev = Some(this);
        }
    }
}
