//! Addressable non-volatile storage.
//!
//! [`Nvm`] is a byte-addressed storage interface with `read`, `write`,
//! `erase` and `size`. Transfers report how many bytes were moved; a count
//! shorter than requested means the range ran past the end of the storage.
//! [`write_all`](Nvm::write_all) and [`read_exact`](Nvm::read_exact) turn
//! short transfers into errors.
//!
//! [`RamNvm`] implements the interface over a borrowed byte slice, which is
//! handy for tests and for RAM-backed configuration areas.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use snafu::{Snafu, ensure};

/// Value of an erased byte.
pub const ERASED: u8 = 0xFF;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum NvmError {
    #[snafu(display("wrote {actual} of {expected} bytes at {addr:#x}"))]
    ShortWrite {
        addr: usize,
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("read {actual} of {expected} bytes at {addr:#x}"))]
    ShortRead {
        addr: usize,
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Byte-addressed persistent storage.
pub trait Nvm {
    /// Writes `buf` at `addr` and returns the number of bytes written.
    fn write(&mut self, addr: usize, buf: &[u8]) -> usize;

    /// Fills `buf` from `addr` and returns the number of bytes read.
    fn read(&mut self, addr: usize, buf: &mut [u8]) -> usize;

    /// Erases `len` bytes from `addr` and returns the number of bytes erased.
    fn erase(&mut self, addr: usize, len: usize) -> usize;

    /// Capacity in bytes.
    fn size(&self) -> usize;

    /// Writes all of `buf` at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`NvmError::ShortWrite`] if fewer bytes were written. The
    /// bytes that fit are written regardless.
    fn write_all(&mut self, addr: usize, buf: &[u8]) -> Result<(), NvmError> {
        let actual = self.write(addr, buf);
        ensure!(
            actual == buf.len(),
            ShortWriteSnafu {
                addr,
                expected: buf.len(),
                actual,
            }
        );
        Ok(())
    }

    /// Fills all of `buf` from `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`NvmError::ShortRead`] if fewer bytes were read.
    fn read_exact(&mut self, addr: usize, buf: &mut [u8]) -> Result<(), NvmError> {
        let expected = buf.len();
        let actual = self.read(addr, buf);
        ensure!(
            actual == expected,
            ShortReadSnafu {
                addr,
                expected,
                actual,
            }
        );
        Ok(())
    }
}

/// [`Nvm`] over a byte slice in RAM.
#[derive(Debug)]
pub struct RamNvm<'a> {
    memory: &'a mut [u8],
}

impl<'a> RamNvm<'a> {
    #[must_use]
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self { memory }
    }

    /// Returns the part of the storage covered by `addr..addr + len`,
    /// clipped to the capacity.
    fn span(&mut self, addr: usize, len: usize) -> &mut [u8] {
        let size = self.memory.len();
        let start = addr.min(size);
        let end = addr.saturating_add(len).min(size);
        if end - start < len {
            log::debug!("access of {len} bytes at {addr:#x} clipped to {size} bytes of storage");
        }
        &mut self.memory[start..end]
    }
}

impl Nvm for RamNvm<'_> {
    fn write(&mut self, addr: usize, buf: &[u8]) -> usize {
        let span = self.span(addr, buf.len());
        let count = span.len();
        span.copy_from_slice(&buf[..count]);
        count
    }

    fn read(&mut self, addr: usize, buf: &mut [u8]) -> usize {
        let span = self.span(addr, buf.len());
        let count = span.len();
        buf[..count].copy_from_slice(span);
        count
    }

    fn erase(&mut self, addr: usize, len: usize) -> usize {
        let span = self.span(addr, len);
        span.fill(ERASED);
        span.len()
    }

    fn size(&self) -> usize {
        self.memory.len()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut memory = [0u8; 16];
        let mut nvm = RamNvm::new(&mut memory);
        assert_eq!(nvm.size(), 16);
        assert_eq!(nvm.write(4, b"hello"), 5);

        let mut buf = [0u8; 5];
        assert_eq!(nvm.read(4, &mut buf), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_short_counts_at_the_end() {
        let mut memory = [0u8; 8];
        let mut nvm = RamNvm::new(&mut memory);
        assert_eq!(nvm.write(6, b"abcd"), 2);
        assert_eq!(nvm.write(8, b"x"), 0);
        assert_eq!(nvm.write(usize::MAX, b"x"), 0);

        let mut buf = [0u8; 4];
        assert_eq!(nvm.read(6, &mut buf), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(nvm.erase(7, 10), 1);
        assert_eq!(memory, [0, 0, 0, 0, 0, 0, b'a', ERASED]);
    }

    #[test]
    fn test_erase() {
        let mut memory = [0u8; 8];
        let mut nvm = RamNvm::new(&mut memory);
        assert_eq!(nvm.erase(2, 3), 3);
        assert_eq!(memory, [0, 0, ERASED, ERASED, ERASED, 0, 0, 0]);
    }

    #[test]
    fn test_write_all_and_read_exact() {
        let mut memory = [0u8; 8];
        let mut nvm = RamNvm::new(&mut memory);
        nvm.write_all(0, b"1234").unwrap();
        assert!(matches!(
            nvm.write_all(6, b"1234"),
            Err(NvmError::ShortWrite {
                addr: 6,
                expected: 4,
                actual: 2,
                ..
            })
        ));

        let mut buf = [0u8; 4];
        nvm.read_exact(0, &mut buf).unwrap();
        assert_eq!(&buf, b"1234");
        let err = nvm.read_exact(5, &mut buf).unwrap_err();
        assert_eq!(err.to_string(), "read 3 of 4 bytes at 0x5");
    }

    #[test]
    fn test_dyn_dispatch() {
        let mut memory = [0u8; 4];
        let mut ram = RamNvm::new(&mut memory);
        let nvm: &mut dyn Nvm = &mut ram;
        assert_eq!(nvm.write(0, &[1, 2]), 2);
        assert_eq!(nvm.size(), 4);
    }

    proptest! {
        #[test]
        fn prop_counts_are_clipped(
            size in 0usize..64,
            addr in 0usize..96,
            data in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut memory = vec![0u8; size];
            let mut nvm = RamNvm::new(&mut memory);
            let expected = size.saturating_sub(addr).min(data.len());
            prop_assert_eq!(nvm.write(addr, &data), expected);

            let mut buf = vec![0u8; data.len()];
            prop_assert_eq!(nvm.read(addr, &mut buf), expected);
            prop_assert_eq!(&buf[..expected], &data[..expected]);
        }
    }
}
