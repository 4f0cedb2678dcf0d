//! The allocation capability shared by every allocator in this crate.
//!
//! Code that needs memory depends on [`Allocator`] only, usually as
//! `&dyn Allocator`, and stays unaware of whether the provider is a
//! [`BitmapPool`](crate::bitmap_pool::BitmapPool), a
//! [`LockedAllocator`](crate::locked::LockedAllocator) or the platform heap.
//!
//! # Contract
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | `alloc(0)` | returns `None`, no state change |
//! | `alloc(n)` on exhaustion | returns `None`, no state change |
//! | `free(null)` | no-op |
//! | `free(p)` for an unknown `p` | no-op, implementations may log a warning |
//! | `destroy()` | releases owned resources, idempotent |
//!
//! The two derived operations, [`alloc_zeroed`](Allocator::alloc_zeroed) and
//! [`reallocate`](Allocator::reallocate), are built from the primitive ones.
//! `reallocate` only copies when the old block's size can be recovered
//! through [`usable_size`](Allocator::usable_size); it never reads past the
//! end of the old block.

use core::ptr::{self, NonNull};

/// A memory allocation capability.
///
/// Methods take `&self` so that one instance can be shared. Implementations
/// that are not safe for concurrent use are simply not `Sync`; wrap them in a
/// [`LockedAllocator`](crate::locked::LockedAllocator) to share them across
/// threads.
///
/// # Safety
///
/// Implementors must guarantee that a block returned by `alloc(size)` is
/// valid for reads and writes of `size` bytes and does not overlap any other
/// block of the same allocator until it is passed to `free`, or until
/// `destroy` is called.
pub unsafe trait Allocator {
    /// Allocates a block of at least `size` bytes.
    ///
    /// Returns `None` if `size` is zero or the request cannot be satisfied.
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Returns a block to the allocator.
    ///
    /// A null `ptr` is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by `alloc` on this allocator
    /// that has not been freed since. Individual implementations may accept
    /// more (see [`BitmapPool`](crate::bitmap_pool::BitmapPool)), but callers
    /// of the capability must not rely on it.
    unsafe fn free(&self, ptr: *mut u8);

    /// Returns the number of bytes usable from `ptr` to the end of its block,
    /// or `None` if the allocator does not know.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live pointer returned by `alloc` on this allocator.
    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let _ = ptr;
        None
    }

    /// Releases any resources owned by the allocator.
    ///
    /// Calling `destroy` more than once has no further effect. Blocks handed
    /// out before `destroy` must not be used afterwards.
    fn destroy(&self);

    /// Allocates `count * size` bytes and fills them with zeroes.
    ///
    /// Returns `None` if the multiplication overflows or the allocation
    /// fails.
    fn alloc_zeroed(&self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(size)?;
        let ptr = self.alloc(total)?;
        unsafe {
            ptr.as_ptr().write_bytes(0, total);
        }
        Some(ptr)
    }

    /// Moves a block into a new allocation of `new_size` bytes.
    ///
    /// - A null `ptr` behaves like [`alloc(new_size)`](Self::alloc).
    /// - A `new_size` of zero frees `ptr` and returns `None`.
    /// - If the old size is unknown, or the new block cannot be allocated,
    ///   returns `None` and leaves the old block untouched.
    /// - Otherwise copies `min(old_size, new_size)` bytes, frees the old
    ///   block and returns the new one.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by `alloc` on this
    /// allocator.
    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        let Some(old) = NonNull::new(ptr) else {
            return self.alloc(new_size);
        };
        if new_size == 0 {
            unsafe { self.free(ptr) };
            return None;
        }

        let old_size = unsafe { self.usable_size(old) }?;
        let new = self.alloc(new_size)?;
        unsafe {
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), old_size.min(new_size));
            self.free(ptr);
        }
        Some(new)
    }
}
