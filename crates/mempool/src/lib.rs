//! Deterministic fixed-pool memory allocation.
//!
//! This crate provides a small allocation capability for systems that cannot
//! rely on a general purpose heap:
//!
//! - [`Allocator`]: the capability, with `alloc`, `free` and `destroy`, plus
//!   the derived [`alloc_zeroed`](Allocator::alloc_zeroed) and
//!   [`reallocate`](Allocator::reallocate);
//! - [`BitmapPool`]: a first-fit pool of fixed-size elements tracked by two
//!   bitmaps, on caller-provided memory or memory taken from another
//!   allocator;
//! - [`LockedAllocator`]: serializes every call to a wrapped allocator through
//!   a mutex;
//! - [`SystemAllocator`] (feature `alloc`): pass-through to the global heap.
//!
//! # Example
//!
//! ```
//! use mempool::{Allocator, PoolMemory, SpinLockedAllocator};
//!
//! let mut memory = PoolMemory::<{ 8 * 17 }, 1>::new();
//! let pool = memory.pool(8, 17).unwrap();
//! let mutex = spin::lock_api::Mutex::new(pool);
//! let allocator: &dyn Allocator = &SpinLockedAllocator::new(&mutex);
//!
//! let ptr = allocator.alloc(20).unwrap();
//! assert_eq!(mutex.lock().allocated_elements(), 3);
//! unsafe { allocator.free(ptr.as_ptr()) };
//! ```
//!
//! # Cost
//!
//! | Operation | `BitmapPool` |
//! |-----------|--------------|
//! | `alloc` | `O(n)` scan of the allocation bitmap, a word at a time over full or empty words |
//! | `free` | `O(n)` scan of the boundary bitmap from the freed element |
//! | metadata | two bits per element, nothing inside the buffer |
//!
//! # Thread safety
//!
//! | Type | `Send` | `Sync` |
//! |------|--------|--------|
//! | `BitmapPool` | yes | no |
//! | `LockedAllocator<R, A>` | if `R: Sync`, `A: Send` | if `R: Sync`, `A: Send` |
//! | `SystemAllocator` | yes | yes |

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

#[cfg(any(feature = "alloc", test))]
extern crate alloc;

pub mod bitmap_pool;
pub mod error;
pub mod locked;
#[cfg(any(feature = "alloc", test))]
pub mod system;
pub mod traits;

pub use bitmap::{WORD_BITS, Word};

#[cfg(any(feature = "alloc", test))]
pub use self::system::SystemAllocator;
pub use self::{
    bitmap_pool::{BitmapPool, PoolLayout, PoolMemory},
    error::{BitmapKind, PoolError},
    locked::{LockedAllocator, SpinLockedAllocator},
    traits::Allocator,
};
