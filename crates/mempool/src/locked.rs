//! Mutual exclusion around an allocator.
//!
//! [`LockedAllocator`] borrows a [`lock_api::Mutex`] that owns the wrapped
//! allocator, and takes the lock for the duration of every call. The guard
//! is released on every path, including failed allocations.
//!
//! Only single calls are serialized. A sequence such as "allocate, then
//! free" from one thread can interleave with calls from other threads.
//!
//! # Deadlock
//!
//! The lock is not reentrant. An allocator that calls back into the same
//! `LockedAllocator` from inside `alloc` or `free` deadlocks.

use core::{fmt, ptr::NonNull};

use lock_api::{Mutex, RawMutex};

use crate::traits::Allocator;

/// A [`LockedAllocator`] using a spin lock, suitable for `no_std` targets.
pub type SpinLockedAllocator<'a, A> = LockedAllocator<'a, spin::Mutex<()>, A>;

/// Serializes calls to the allocator inside a mutex.
///
/// The wrapper is a shared reference and is cheap to copy; destroying it
/// leaves the mutex and the wrapped allocator untouched.
pub struct LockedAllocator<'a, R, A>
where
    R: RawMutex,
{
    inner: &'a Mutex<R, A>,
}

impl<R, A> Clone for LockedAllocator<'_, R, A>
where
    R: RawMutex,
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<R, A> Copy for LockedAllocator<'_, R, A> where R: RawMutex {}

impl<R, A> fmt::Debug for LockedAllocator<'_, R, A>
where
    R: RawMutex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedAllocator")
            .field("locked", &self.inner.is_locked())
            .finish_non_exhaustive()
    }
}

impl<'a, R, A> LockedAllocator<'a, R, A>
where
    R: RawMutex,
{
    #[must_use]
    pub const fn new(inner: &'a Mutex<R, A>) -> Self {
        Self { inner }
    }

    /// Returns the mutex guarding the wrapped allocator.
    #[must_use]
    pub fn mutex(&self) -> &'a Mutex<R, A> {
        self.inner
    }
}

unsafe impl<R, A> Allocator for LockedAllocator<'_, R, A>
where
    R: RawMutex,
    A: Allocator,
{
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.inner.lock().alloc(size)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        unsafe { self.inner.lock().free(ptr) }
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        unsafe { self.inner.lock().usable_size(ptr) }
    }

    /// Does nothing; the owner of the mutex destroys the wrapped allocator.
    fn destroy(&self) {}

    fn alloc_zeroed(&self, count: usize, size: usize) -> Option<NonNull<u8>> {
        self.inner.lock().alloc_zeroed(count, size)
    }

    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        unsafe { self.inner.lock().reallocate(ptr, new_size) }
    }
}
