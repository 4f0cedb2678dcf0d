//! Pass-through to the global heap.

use alloc::alloc as global;
use core::{alloc::Layout, ptr::NonNull};

use crate::traits::Allocator;

/// Bytes in front of each block holding its requested size.
const HEADER_SIZE: usize = 16;
const ALIGN: usize = 16;

/// An [`Allocator`] backed by the global allocator.
///
/// Every block is aligned to 16 bytes and carries a 16-byte header with its
/// size, so [`usable_size`](Allocator::usable_size) and
/// [`reallocate`](Allocator::reallocate) work without extra bookkeeping.
/// `destroy` does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl SystemAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.checked_add(HEADER_SIZE)?, ALIGN).ok()
    }

    unsafe fn header(ptr: NonNull<u8>) -> NonNull<usize> {
        unsafe { ptr.sub(HEADER_SIZE).cast() }
    }

    fn finish(block: *mut u8, size: usize) -> Option<NonNull<u8>> {
        let block = NonNull::new(block)?;
        unsafe {
            block.cast::<usize>().write(size);
            Some(block.add(HEADER_SIZE))
        }
    }
}

unsafe impl Allocator for SystemAllocator {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Self::layout(size)?;
        Self::finish(unsafe { global::alloc(layout) }, size)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        unsafe {
            let header = Self::header(ptr);
            let size = header.read();
            let layout = Layout::from_size_align_unchecked(size + HEADER_SIZE, ALIGN);
            global::dealloc(header.cast().as_ptr(), layout);
        }
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        Some(unsafe { Self::header(ptr).read() })
    }

    fn destroy(&self) {}

    fn alloc_zeroed(&self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let size = count.checked_mul(size)?;
        if size == 0 {
            return None;
        }
        let layout = Self::layout(size)?;
        Self::finish(unsafe { global::alloc_zeroed(layout) }, size)
    }
}
