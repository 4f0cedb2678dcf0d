use core::{ptr::NonNull, slice};

use bitmap::{WORD_BITS, Word};
use snafu::ensure;

use super::BitmapPool;
use crate::error::{CapacityExceededSnafu, PoolError};

/// Word storage the pool reaches through a raw pointer.
///
/// The pool keeps the real borrow (or the upstream allocation) alive for as
/// long as a `RawWords` exists.
pub(super) struct RawWords {
    ptr: NonNull<Word>,
    len: usize,
}

impl RawWords {
    pub(super) fn from_slice(words: &mut [Word]) -> Self {
        let len = words.len();
        Self {
            ptr: NonNull::from(words).cast(),
            len,
        }
    }

    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` words for as long as
    /// the returned value is used.
    pub(super) unsafe fn from_raw_parts(ptr: NonNull<Word>, len: usize) -> Self {
        Self { ptr, len }
    }
}

impl AsRef<[Word]> for RawWords {
    fn as_ref(&self) -> &[Word] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl AsMut<[Word]> for RawWords {
    fn as_mut(&mut self) -> &mut [Word] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// Statically sized backing memory for a [`BitmapPool`].
///
/// `BYTES` is the size of the element buffer and `WORDS` the number of words
/// reserved for each bitmap, so a pool built on it holds at most
/// `WORDS * WORD_BITS` elements. The buffer is aligned to 16 bytes.
///
/// ```
/// use mempool::{Allocator as _, PoolMemory};
///
/// let mut memory = PoolMemory::<{ 8 * 17 }, 1>::new();
/// let pool = memory.pool(8, 17).unwrap();
/// let ptr = pool.alloc(24).unwrap();
/// assert_eq!(pool.allocated_elements(), 3);
/// unsafe { pool.free(ptr.as_ptr()) };
/// ```
#[repr(C, align(16))]
pub struct PoolMemory<const BYTES: usize, const WORDS: usize> {
    buffer: [u8; BYTES],
    allocation: [Word; WORDS],
    boundary: [Word; WORDS],
}

impl<const BYTES: usize, const WORDS: usize> Default for PoolMemory<BYTES, WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BYTES: usize, const WORDS: usize> PoolMemory<BYTES, WORDS> {
    /// Maximum number of elements a pool on this memory can track.
    pub const CAPACITY: usize = WORDS * WORD_BITS;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0; BYTES],
            allocation: [0; WORDS],
            boundary: [0; WORDS],
        }
    }

    /// Builds a pool of `num_elements` elements of `element_size` bytes on
    /// this memory.
    ///
    /// The memory stays borrowed by the pool; once the pool is dropped a new
    /// one may be built on it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::CapacityExceeded`] if `num_elements` exceeds
    /// [`CAPACITY`](Self::CAPACITY), and any error of
    /// [`BitmapPool::from_buffers`] otherwise.
    pub fn pool(
        &mut self,
        element_size: usize,
        num_elements: usize,
    ) -> Result<BitmapPool<'_>, PoolError> {
        ensure!(
            num_elements <= Self::CAPACITY,
            CapacityExceededSnafu {
                num_elements,
                capacity: Self::CAPACITY,
            }
        );
        BitmapPool::from_buffers(
            &mut self.buffer,
            &mut self.allocation,
            &mut self.boundary,
            element_size,
            num_elements,
        )
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Allocator as _;

    #[test]
    fn test_capacity_exceeded() {
        let mut memory = PoolMemory::<1024, 1>::new();
        let err = memory.pool(1, WORD_BITS + 1).unwrap_err();
        assert!(matches!(
            err,
            PoolError::CapacityExceeded { num_elements, capacity, .. }
                if num_elements == WORD_BITS + 1 && capacity == WORD_BITS
        ));
    }

    #[test]
    fn test_buffer_too_small() {
        let mut memory = PoolMemory::<64, 1>::new();
        let err = memory.pool(8, 9).unwrap_err();
        assert!(matches!(
            err,
            PoolError::BufferTooSmall {
                needed: 72,
                actual: 64,
                ..
            }
        ));
    }

    #[test]
    fn test_pool_is_rebuilt_empty() {
        let mut memory = PoolMemory::<64, 1>::new();
        {
            let pool = memory.pool(8, 8).unwrap();
            let _leaked = pool.alloc(32).unwrap();
            assert_eq!(pool.allocated_elements(), 4);
        }
        let pool = memory.pool(8, 8).unwrap();
        assert_eq!(pool.allocated_elements(), 0);
        assert!(pool.alloc(64).is_some());
    }

    #[test]
    fn test_buffer_alignment() {
        let mut memory = PoolMemory::<48, 1>::new();
        let pool = memory.pool(16, 3).unwrap();
        let ptr = pool.alloc(1).unwrap();
        assert_eq!(ptr.as_ptr().addr() % 16, 0);
    }
}
