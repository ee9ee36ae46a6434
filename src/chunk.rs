//! Chunk arithmetic.
//!
//! The backing region is carved into fixed-size chunks; every slot
//! spans a whole number of them. A slot's header claims the slot's
//! entire first chunk (the record itself is smaller, but the rest of
//! that chunk is never handed out), so a request for `x` payload bytes
//! needs one chunk per `CHUNK_SIZE` bytes plus the header's chunk, and
//! every payload starts on a chunk boundary.

use static_assertions::const_assert;

use crate::slot::Header;

/// The allocation quantum, in bytes.
pub const CHUNK_SIZE: usize = 512;

// A header must fit within the first chunk of its slot, and every chunk
// boundary must be a valid header address.
const_assert!(CHUNK_SIZE.is_power_of_two());
const_assert!(core::mem::size_of::<Header>() <= CHUNK_SIZE);
const_assert!(CHUNK_SIZE % core::mem::align_of::<Header>() == 0);

/// Largest multiple of `CHUNK_SIZE` that is at most `bytes`.
pub const fn round_down(bytes: usize) -> usize {
    bytes & !(CHUNK_SIZE - 1)
}

/// Minimum number of chunks that can hold `bytes` of payload plus the
/// header's chunk: the smallest `n` with `n * CHUNK_SIZE >= bytes +
/// CHUNK_SIZE`. `num_chunks(0)` is 0: a zero-byte request does not map
/// to a slot at all.
pub const fn num_chunks(bytes: usize) -> usize {
    if bytes == 0 {
        return 0;
    }

    // A request within a chunk of `usize::MAX` cannot fit any region a
    // host could supply; saturate instead of wrapping.
    match bytes.checked_add(CHUNK_SIZE - 1) {
        Some(padded) => padded / CHUNK_SIZE + 1,
        None => usize::MAX / CHUNK_SIZE,
    }
}
