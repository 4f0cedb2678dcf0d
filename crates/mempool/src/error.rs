use bitmap::BitmapError;
use derive_more::Display;
use snafu::{Location, Snafu};

/// Identifies one of the two bitmaps of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BitmapKind {
    #[display("allocation")]
    Allocation,
    #[display("boundary")]
    Boundary,
}

/// Errors reported while constructing a pool.
///
/// Allocation and deallocation never fail with an error: exhaustion is
/// reported as `None` and invalid frees are ignored.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PoolError {
    #[snafu(display("element size must be non-zero"))]
    ZeroElementSize {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("pool must hold at least one element"))]
    ZeroElements {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{num_elements} elements of {element_size} bytes overflow the address space"))]
    SizeOverflow {
        element_size: usize,
        num_elements: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("buffer holds {actual} bytes, pool needs {needed}"))]
    BufferTooSmall {
        needed: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid {which} bitmap: {source}"))]
    Bitmap {
        which: BitmapKind,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: BitmapError,
    },
    #[snafu(display("{num_elements} elements exceed the reserved bitmap capacity of {capacity}"))]
    CapacityExceeded {
        num_elements: usize,
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("upstream allocator could not provide {bytes} bytes"))]
    UpstreamExhausted {
        bytes: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("upstream allocator returned bitmap memory not aligned for words"))]
    MisalignedBitmap {
        #[snafu(implicit)]
        location: Location,
    },
}
