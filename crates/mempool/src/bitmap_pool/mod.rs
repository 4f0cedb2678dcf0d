//! Fixed-size element pool tracked by two bitmaps.
//!
//! A pool splits one contiguous buffer into `num_elements` elements of
//! `element_size` bytes. A request for `size` bytes takes the first run of
//! `ceil(size / element_size)` consecutive free elements, scanning from
//! element 0. Two bitmaps of `num_elements` bits describe the state:
//!
//! - the *allocation* bitmap has bit `i` set while element `i` is in use;
//! - the *boundary* bitmap has bit `i` set when element `i` is the last
//!   element of an allocated run.
//!
//! ```text
//!  element     0   1   2   3   4   5   6   7
//!  allocation  1   1   1   0   1   0   0   0
//!  boundary    0   0   1   0   1   0   0   0
//!              \___run___/     run
//! ```
//!
//! Freeing a run only needs its first address: the run ends at the first
//! boundary bit at or after it. Nothing is stored inside the buffer, so the
//! bookkeeping cost is two bits per element, and for a fixed sequence of
//! requests the returned offsets are always the same.
//!
//! The pool performs no locking. It is `Send` but not `Sync`; share it
//! between threads through a [`LockedAllocator`](crate::locked::LockedAllocator).
//!
//! # Examples
//!
//! A pool on caller-provided memory:
//!
//! ```
//! use mempool::{Allocator as _, BitmapPool, Word};
//!
//! let mut buffer = [0u8; 8 * 17];
//! let mut allocation = [0 as Word; 1];
//! let mut boundary = [0 as Word; 1];
//! let pool =
//!     BitmapPool::from_buffers(&mut buffer, &mut allocation, &mut boundary, 8, 17).unwrap();
//!
//! let a = pool.alloc(10).unwrap(); // elements 0..2
//! let b = pool.alloc(8).unwrap(); // element 2
//! assert_eq!(pool.allocated_elements(), 3);
//!
//! unsafe { pool.free(a.as_ptr()) };
//! let c = pool.alloc(16).unwrap(); // reuses elements 0..2
//! assert_eq!(c, a);
//! # let _ = b;
//! ```

use core::{cell::RefCell, fmt, marker::PhantomData, ptr::NonNull};

use bitmap::{Bitmap, Word};
use derive_more::{Display, IsVariant};
use snafu::{OptionExt as _, ResultExt as _, ensure};

pub use self::memory::PoolMemory;
use self::memory::RawWords;
use crate::{
    error::{
        BitmapKind, BitmapSnafu, BufferTooSmallSnafu, MisalignedBitmapSnafu, PoolError,
        SizeOverflowSnafu, UpstreamExhaustedSnafu, ZeroElementSizeSnafu, ZeroElementsSnafu,
    },
    traits::Allocator,
};

mod memory;

/// Validated geometry of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    element_size: usize,
    num_elements: usize,
    buffer_bytes: usize,
}

impl PoolLayout {
    /// Checks that a pool of `num_elements` elements of `element_size` bytes
    /// can exist.
    ///
    /// # Errors
    ///
    /// Returns an error if either argument is zero or the buffer size
    /// overflows `usize`.
    pub fn new(element_size: usize, num_elements: usize) -> Result<Self, PoolError> {
        ensure!(element_size > 0, ZeroElementSizeSnafu);
        ensure!(num_elements > 0, ZeroElementsSnafu);
        let buffer_bytes = element_size
            .checked_mul(num_elements)
            .context(SizeOverflowSnafu {
                element_size,
                num_elements,
            })?;
        Ok(Self {
            element_size,
            num_elements,
            buffer_bytes,
        })
    }

    #[must_use]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    /// Size of the element buffer in bytes.
    #[must_use]
    pub fn buffer_bytes(&self) -> usize {
        self.buffer_bytes
    }

    /// Number of words needed by each of the two bitmaps.
    #[must_use]
    pub fn bitmap_words(&self) -> usize {
        bitmap::words_for(self.num_elements)
    }

    /// Total bytes a pool with this layout takes from an upstream allocator.
    #[must_use]
    pub fn footprint_bytes(&self) -> usize {
        self.buffer_bytes
            .saturating_add(2 * self.bitmap_words() * size_of::<Word>())
    }
}

#[derive(IsVariant)]
enum Ownership<'a> {
    Borrowed,
    Owned {
        upstream: &'a (dyn Allocator + Sync),
        blocks: [NonNull<u8>; 3],
    },
}

/// Why a pointer was not accepted as the start of an allocated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum Rejection {
    #[display("pool is destroyed")]
    Destroyed,
    #[display("pointer is outside the pool buffer")]
    Foreign,
    #[display("element is not allocated")]
    NotAllocated,
    #[display("pointer is inside a run, not at its start")]
    InsideRun,
    #[display("allocated run has no boundary")]
    MissingBoundary,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    first: usize,
    last: usize,
}

impl Run {
    fn len(self) -> usize {
        self.last - self.first + 1
    }
}

struct PoolState {
    base: NonNull<u8>,
    layout: PoolLayout,
    allocated_elements: usize,
    allocation: Bitmap<RawWords>,
    boundary: Bitmap<RawWords>,
    destroyed: bool,
}

impl PoolState {
    fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let offset = ptr.addr().checked_sub(self.base.as_ptr().addr())?;
        (offset < self.layout.buffer_bytes).then_some(offset)
    }

    fn address_of(&self, index: usize) -> NonNull<u8> {
        unsafe { self.base.add(index * self.layout.element_size) }
    }

    fn lookup(&self, ptr: *const u8) -> Result<Run, Rejection> {
        if self.destroyed {
            return Err(Rejection::Destroyed);
        }
        let offset = self.offset_of(ptr).ok_or(Rejection::Foreign)?;
        let first = offset / self.layout.element_size;
        if !self.allocation.get(first) {
            return Err(Rejection::NotAllocated);
        }
        if first > 0 && self.allocation.get(first - 1) && !self.boundary.get(first - 1) {
            return Err(Rejection::InsideRun);
        }
        let last = self
            .boundary
            .next_set(first)
            .ok_or(Rejection::MissingBoundary)?;
        Ok(Run { first, last })
    }

    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if self.destroyed {
            log::warn!("alloc of {size} bytes from a destroyed pool");
            return None;
        }
        if size == 0 {
            return None;
        }

        let needed = size.div_ceil(self.layout.element_size);
        let Some(first) = self.allocation.find_clear_run(needed, 0) else {
            log::warn!(
                "alloc of {size} bytes failed: no run of {needed} free elements, {}/{} in use",
                self.allocated_elements,
                self.layout.num_elements,
            );
            return None;
        };

        self.mark_busy(Run {
            first,
            last: first + needed - 1,
        });
        self.allocated_elements += needed;

        let ptr = self.address_of(first);
        log::trace!(
            "alloc {size} bytes at {ptr:p}, elements {first}..{}",
            first + needed
        );
        Some(ptr)
    }

    fn deallocate(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let run = match self.lookup(ptr) {
            Ok(run) => run,
            Err(reason) => {
                if reason == Rejection::MissingBoundary {
                    log::error!("free of {ptr:p} ignored: {reason}");
                } else {
                    log::warn!("free of {ptr:p} ignored: {reason}");
                }
                debug_assert_ne!(
                    reason,
                    Rejection::MissingBoundary,
                    "pool bitmaps are corrupted"
                );
                return;
            }
        };

        self.mark_free(run);
        self.allocated_elements -= run.len();
        log::trace!(
            "free {ptr:p}, elements {}..{}",
            run.first,
            run.last + 1
        );
    }

    fn run_bytes(&self, ptr: *const u8) -> Option<usize> {
        let run = self.lookup(ptr).ok()?;
        let offset = self.offset_of(ptr)?;
        Some((run.last + 1) * self.layout.element_size - offset)
    }

    fn mark_busy(&mut self, run: Run) {
        debug_assert!(run.last < self.layout.num_elements);
        debug_assert!(
            (run.first..=run.last).all(|i| !self.allocation.get(i) && !self.boundary.get(i)),
            "elements {}..={} are not free",
            run.first,
            run.last
        );
        self.allocation.set_range(run.first..run.last + 1);
        self.boundary.set(run.last);
    }

    fn mark_free(&mut self, run: Run) {
        debug_assert!(
            (run.first..=run.last).all(|i| self.allocation.get(i)),
            "elements {}..={} are not all allocated",
            run.first,
            run.last
        );
        self.allocation.clear_range(run.first..run.last + 1);
        self.boundary.clear(run.last);
    }
}

/// A fixed-size element pool allocator.
///
/// See the [module documentation](self) for the algorithm.
pub struct BitmapPool<'a> {
    state: RefCell<PoolState>,
    ownership: Ownership<'a>,
    _memory: PhantomData<&'a mut [u8]>,
}

// The buffer and bitmaps are either exclusively borrowed for `'a` or owned
// through an upstream allocator that is itself `Sync`.
unsafe impl Send for BitmapPool<'_> {}

impl fmt::Debug for BitmapPool<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("BitmapPool");
        match self.state.try_borrow() {
            Ok(state) => {
                d.field("base", &state.base)
                    .field("element_size", &state.layout.element_size)
                    .field("num_elements", &state.layout.num_elements)
                    .field("allocated_elements", &state.allocated_elements)
                    .field("destroyed", &state.destroyed);
            }
            Err(_) => {
                d.field("state", &format_args!("<borrowed>"));
            }
        }
        d.field("owns_memory", &self.ownership.is_owned()).finish()
    }
}

impl<'a> BitmapPool<'a> {
    /// Builds a pool on caller-provided memory.
    ///
    /// `buffer` must hold at least `element_size * num_elements` bytes and
    /// each bitmap slice at least [`words_for(num_elements)`](bitmap::words_for)
    /// words. Both bitmaps are cleared. The memory is released by the caller
    /// once the pool is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid or a slice is too small.
    pub fn from_buffers(
        buffer: &'a mut [u8],
        allocation: &'a mut [Word],
        boundary: &'a mut [Word],
        element_size: usize,
        num_elements: usize,
    ) -> Result<Self, PoolError> {
        let layout = PoolLayout::new(element_size, num_elements)?;
        ensure!(
            buffer.len() >= layout.buffer_bytes(),
            BufferTooSmallSnafu {
                needed: layout.buffer_bytes(),
                actual: buffer.len(),
            }
        );
        Self::from_parts(
            NonNull::from(buffer).cast(),
            RawWords::from_slice(allocation),
            RawWords::from_slice(boundary),
            layout,
            Ownership::Borrowed,
        )
    }

    /// Builds a pool whose buffer and bitmaps are obtained from `upstream`.
    ///
    /// The three blocks are returned to `upstream` when the pool is
    /// destroyed or dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid or `upstream` cannot
    /// provide the memory. Blocks obtained before the failure are freed.
    pub fn with_upstream(
        upstream: &'a (dyn Allocator + Sync),
        element_size: usize,
        num_elements: usize,
    ) -> Result<Self, PoolError> {
        let layout = PoolLayout::new(element_size, num_elements)?;
        let words = layout.bitmap_words();

        let buffer = upstream.alloc(layout.buffer_bytes());
        let allocation = upstream.alloc_zeroed(words, size_of::<Word>());
        let boundary = upstream.alloc_zeroed(words, size_of::<Word>());
        let release = |blocks: [Option<NonNull<u8>>; 3]| {
            for block in blocks.into_iter().flatten() {
                unsafe { upstream.free(block.as_ptr()) };
            }
        };

        let (Some(buffer), Some(allocation), Some(boundary)) = (buffer, allocation, boundary)
        else {
            release([buffer, allocation, boundary]);
            return UpstreamExhaustedSnafu {
                bytes: layout.footprint_bytes(),
            }
            .fail();
        };
        if !allocation.cast::<Word>().is_aligned() || !boundary.cast::<Word>().is_aligned() {
            release([Some(buffer), Some(allocation), Some(boundary)]);
            return MisalignedBitmapSnafu.fail();
        }

        let (allocation_words, boundary_words) = unsafe {
            (
                RawWords::from_raw_parts(allocation.cast(), words),
                RawWords::from_raw_parts(boundary.cast(), words),
            )
        };
        let ownership = Ownership::Owned {
            upstream,
            blocks: [buffer, allocation, boundary],
        };
        Self::from_parts(buffer, allocation_words, boundary_words, layout, ownership)
    }

    fn from_parts(
        base: NonNull<u8>,
        allocation: RawWords,
        boundary: RawWords,
        layout: PoolLayout,
        ownership: Ownership<'a>,
    ) -> Result<Self, PoolError> {
        let mut allocation = match Bitmap::new(allocation, layout.num_elements()) {
            Ok(bitmap) => bitmap,
            Err(source) => {
                Self::release_ownership(&ownership);
                return Err(source).context(BitmapSnafu {
                    which: BitmapKind::Allocation,
                });
            }
        };
        let mut boundary = match Bitmap::new(boundary, layout.num_elements()) {
            Ok(bitmap) => bitmap,
            Err(source) => {
                Self::release_ownership(&ownership);
                return Err(source).context(BitmapSnafu {
                    which: BitmapKind::Boundary,
                });
            }
        };
        allocation.clear_all();
        boundary.clear_all();

        log::debug!(
            "pool at {base:p}: {} elements of {} bytes, {}",
            layout.num_elements(),
            layout.element_size(),
            if ownership.is_owned() { "owned" } else { "borrowed" },
        );
        Ok(Self {
            state: RefCell::new(PoolState {
                base,
                layout,
                allocated_elements: 0,
                allocation,
                boundary,
                destroyed: false,
            }),
            ownership,
            _memory: PhantomData,
        })
    }

    fn release_ownership(ownership: &Ownership<'_>) {
        if let Ownership::Owned { upstream, blocks } = ownership {
            for block in blocks {
                unsafe { upstream.free(block.as_ptr()) };
            }
        }
    }

    /// Allocates a run of elements covering `size` bytes.
    ///
    /// Same as [`Allocator::alloc`], without going through the trait.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.state.borrow_mut().allocate(size)
    }

    /// Frees the run starting in the element that contains `ptr`.
    ///
    /// Null, foreign, already free and mid-run pointers are ignored with a
    /// warning. A pointer inside the first element of a run is accepted.
    pub fn deallocate(&self, ptr: *mut u8) {
        self.state.borrow_mut().deallocate(ptr);
    }

    /// Returns the number of bytes from `ptr` to the end of its run, or
    /// `None` if `ptr` is not the start of an allocated run.
    #[must_use]
    pub fn run_bytes(&self, ptr: *const u8) -> Option<usize> {
        self.state.borrow().run_bytes(ptr)
    }

    #[must_use]
    pub fn element_size(&self) -> usize {
        self.state.borrow().layout.element_size
    }

    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.state.borrow().layout.num_elements
    }

    /// Number of elements currently in use.
    #[must_use]
    pub fn allocated_elements(&self) -> usize {
        self.state.borrow().allocated_elements
    }

    #[must_use]
    pub fn free_elements(&self) -> usize {
        let state = self.state.borrow();
        state.layout.num_elements - state.allocated_elements
    }

    /// Size of the element buffer in bytes.
    #[must_use]
    pub fn capacity_bytes(&self) -> usize {
        self.state.borrow().layout.buffer_bytes
    }

    /// Returns `true` if the pool's memory came from an upstream allocator.
    #[must_use]
    pub fn owns_memory(&self) -> bool {
        self.ownership.is_owned()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state.borrow().destroyed
    }

    /// Returns `true` if `ptr` points into the element buffer of a live pool.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let state = self.state.borrow();
        !state.destroyed && state.offset_of(ptr).is_some()
    }

    /// Calls `f` with the allocation and boundary bitmap words.
    ///
    /// Both slices are empty once the pool is destroyed.
    ///
    /// # Panics
    ///
    /// Panics if `f` allocates from or frees to this pool.
    pub fn with_bitmaps<R>(&self, f: impl FnOnce(&[Word], &[Word]) -> R) -> R {
        let state = self.state.borrow();
        if state.destroyed {
            return f(&[], &[]);
        }
        f(state.allocation.as_words(), state.boundary.as_words())
    }

    fn release(&self) {
        let mut state = self.state.borrow_mut();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        state.allocated_elements = 0;
        Self::release_ownership(&self.ownership);
        log::debug!("pool at {:p} destroyed", state.base);
    }
}

unsafe impl Allocator for BitmapPool<'_> {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.allocate(size)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        self.deallocate(ptr);
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.run_bytes(ptr.as_ptr())
    }

    fn destroy(&self) {
        self.release();
    }
}

impl Drop for BitmapPool<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
