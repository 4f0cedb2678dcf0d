//! A fixed-size bitmap stored in an array of machine words.
//!
//! `Bitmap` addresses individual bits by index and maps each index to a
//! `(word, offset)` pair inside its backing storage. The storage is anything
//! that can be viewed as a slice of [`Word`]s: a borrowed slice, an array, a
//! `Vec`, or a raw region wrapped by the caller.
//!
//! # Features
//!
//! - **Single bit access**: [`get`](Bitmap::get), [`set`](Bitmap::set),
//!   [`clear`](Bitmap::clear)
//! - **Run search**: [`find_clear_run`](Bitmap::find_clear_run) finds the
//!   lowest run of `n` contiguous clear bits, skipping whole words where
//!   possible
//! - **No-std support**: no allocation, storage is supplied by the caller
//!
//! # Examples
//!
//! ```
//! use bitmap::Bitmap;
//!
//! let mut bitmap = Bitmap::new([0usize; 2], 100).unwrap();
//!
//! bitmap.set_range(0..3);
//! bitmap.set(5);
//! assert!(bitmap.get(1));
//! assert_eq!(bitmap.count_ones(), 4);
//!
//! // bits 3 and 4 are too short for a run of three
//! assert_eq!(bitmap.find_clear_run(3, 0), Some(6));
//! assert_eq!(bitmap.next_set(3), Some(5));
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::{fmt, ops::Range};

use snafu::{Snafu, ensure};

/// The unit of bitmap storage.
pub type Word = usize;

/// Number of bits held by one [`Word`].
pub const WORD_BITS: usize = Word::BITS as usize;

/// Returns the number of words needed to hold `bits` bits.
///
/// # Examples
///
/// ```
/// use bitmap::{WORD_BITS, words_for};
///
/// assert_eq!(words_for(0), 0);
/// assert_eq!(words_for(1), 1);
/// assert_eq!(words_for(WORD_BITS), 1);
/// assert_eq!(words_for(WORD_BITS + 1), 2);
/// ```
#[must_use]
pub const fn words_for(bits: usize) -> usize {
    bits.div_ceil(WORD_BITS)
}

const fn locate(index: usize) -> (usize, usize) {
    (index / WORD_BITS, index % WORD_BITS)
}

const fn mask(offset: usize) -> Word {
    1 << offset
}

#[derive(Debug, Snafu)]
pub enum BitmapError {
    #[snafu(display("bitmap of {len} bits needs {needed} words, storage holds {actual}"))]
    StorageTooSmall {
        len: usize,
        needed: usize,
        actual: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// A bitmap of `len` bits backed by word storage `S`.
///
/// Bits past `len` in the last word are never set by this type and are
/// ignored by every query.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bitmap<S> {
    words: S,
    len: usize,
}

impl<S> fmt::Debug for Bitmap<S>
where
    S: AsRef<[Word]>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("len", &self.len)
            .field("ones", &self.count_ones())
            .finish()
    }
}

impl<S> Bitmap<S>
where
    S: AsRef<[Word]>,
{
    /// Wraps `words` as a bitmap of `len` bits.
    ///
    /// The existing contents of `words` are kept; call
    /// [`clear_all`](Self::clear_all) to start from an empty bitmap.
    ///
    /// # Errors
    ///
    /// Returns [`BitmapError::StorageTooSmall`] if `words` holds fewer than
    /// [`words_for(len)`](words_for) words.
    pub fn new(words: S, len: usize) -> Result<Self, BitmapError> {
        let needed = words_for(len);
        let actual = words.as_ref().len();
        ensure!(
            actual >= needed,
            StorageTooSmallSnafu {
                len,
                needed,
                actual
            }
        );
        Ok(Self { words, len })
    }

    /// Returns the number of bits in the bitmap.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the bitmap holds no bits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the words covering the bitmap's bits.
    #[must_use]
    pub fn as_words(&self) -> &[Word] {
        &self.words.as_ref()[..words_for(self.len)]
    }

    /// Consumes the bitmap, returning its storage.
    pub fn into_inner(self) -> S {
        self.words
    }

    /// Returns the value of bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        self.check_index(index);
        let (word, offset) = locate(index);
        self.as_words()[word] & mask(offset) != 0
    }

    /// Returns the number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        let Some((last, full)) = self.as_words().split_last() else {
            return 0;
        };
        let tail = self.len % WORD_BITS;
        let last = if tail == 0 {
            *last
        } else {
            *last & (mask(tail) - 1)
        };
        full.iter().map(|word| word.count_ones() as usize).sum::<usize>()
            + last.count_ones() as usize
    }

    /// Finds the lowest index `>= from` that starts `count` consecutive clear
    /// bits lying entirely inside the bitmap.
    ///
    /// Words that are entirely set or entirely clear are consumed in one step.
    /// A `count` of zero is satisfied at `from` itself.
    ///
    /// # Examples
    ///
    /// ```
    /// use bitmap::Bitmap;
    ///
    /// let mut bitmap = Bitmap::new([0usize; 1], 8).unwrap();
    /// bitmap.set(2);
    /// assert_eq!(bitmap.find_clear_run(2, 0), Some(0));
    /// assert_eq!(bitmap.find_clear_run(3, 0), Some(3));
    /// assert_eq!(bitmap.find_clear_run(6, 0), None);
    /// ```
    #[must_use]
    pub fn find_clear_run(&self, count: usize, from: usize) -> Option<usize> {
        if from > self.len {
            return None;
        }
        if count == 0 {
            return Some(from);
        }

        let words = self.as_words();
        let mut run = 0;
        let mut start = from;
        let mut index = from;
        while index < self.len {
            let (word_index, offset) = locate(index);
            let word = words[word_index];

            if offset == 0 && index + WORD_BITS <= self.len {
                if word == 0 {
                    if run == 0 {
                        start = index;
                    }
                    run += WORD_BITS;
                    if run >= count {
                        return Some(start);
                    }
                    index += WORD_BITS;
                    continue;
                }
                if word == Word::MAX {
                    run = 0;
                    index += WORD_BITS;
                    continue;
                }
            }

            if word & mask(offset) == 0 {
                if run == 0 {
                    start = index;
                }
                run += 1;
                if run >= count {
                    return Some(start);
                }
            } else {
                run = 0;
            }
            index += 1;
        }
        None
    }

    /// Finds the lowest set bit at an index `>= from`.
    #[must_use]
    pub fn next_set(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }

        let words = self.as_words();
        let (mut word_index, offset) = locate(from);
        let mut word = words[word_index] & (Word::MAX << offset);
        loop {
            if word != 0 {
                let index = word_index * WORD_BITS + word.trailing_zeros() as usize;
                return (index < self.len).then_some(index);
            }
            word_index += 1;
            if word_index >= words.len() {
                return None;
            }
            word = words[word_index];
        }
    }

    fn check_index(&self, index: usize) {
        assert!(
            index < self.len,
            "bit index {index} out of range for bitmap of {} bits",
            self.len
        );
    }

    fn check_range(&self, range: &Range<usize>) {
        assert!(
            range.start <= range.end && range.end <= self.len,
            "Invalid range: {range:?} for bitmap of {} bits",
            self.len
        );
    }
}

impl<S> Bitmap<S>
where
    S: AsRef<[Word]> + AsMut<[Word]>,
{
    fn words_mut(&mut self) -> &mut [Word] {
        let count = words_for(self.len);
        &mut self.words.as_mut()[..count]
    }

    /// Sets bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn set(&mut self, index: usize) {
        self.check_index(index);
        let (word, offset) = locate(index);
        self.words_mut()[word] |= mask(offset);
    }

    /// Clears bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn clear(&mut self, index: usize) {
        self.check_index(index);
        let (word, offset) = locate(index);
        self.words_mut()[word] &= !mask(offset);
    }

    /// Sets every bit in `range`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is reversed or extends past `self.len()`.
    pub fn set_range(&mut self, range: Range<usize>) {
        self.check_range(&range);
        let words = self.words_mut();
        for index in range {
            let (word, offset) = locate(index);
            words[word] |= mask(offset);
        }
    }

    /// Clears every bit in `range`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is reversed or extends past `self.len()`.
    pub fn clear_range(&mut self, range: Range<usize>) {
        self.check_range(&range);
        let words = self.words_mut();
        for index in range {
            let (word, offset) = locate(index);
            words[word] &= !mask(offset);
        }
    }

    /// Clears every bit, including unused bits of the last word.
    pub fn clear_all(&mut self) {
        self.words_mut().fill(0);
    }
}
