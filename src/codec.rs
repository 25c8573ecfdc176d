//! Binary wire primitives.
//!
//! Every integer is big-endian. Counts and lengths that can never be zero are
//! stored biased by one (`n` is written as `n - 1`), so a one-byte count covers
//! 1..=256. Amounts use a fixed-width word of [`WORD_BYTES`] bytes.
//!
//! [`Reader`] is a cursor over a borrowed buffer: a failed read leaves the
//! cursor where it was.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::constants::WORD_BYTES;
use crate::Hash;

/// Errors from decoding or encoding wire data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("bad binary payload: {0}")]
    BadBinaryPayload(Fault),
}

/// What exactly was wrong with a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("input truncated")]
    Truncated,
    #[error("pack shorter than its fixed header")]
    ShortPack,
    #[error("pack carries no transitions")]
    NoTransitions,
    #[error("unknown transition tag {0}")]
    UnknownTag(u8),
    #[error("transition type appears twice")]
    DuplicateTransition,
    #[error("duplicate entry")]
    DuplicateEntry,
    #[error("invalid flag {0}")]
    InvalidFlag(u8),
    #[error("trailing bytes after last transition")]
    TrailingBytes,
    #[error("value does not fit its field")]
    OutOfRange,
}

impl From<Fault> for CodecError {
    fn from(fault: Fault) -> Self {
        CodecError::BadBinaryPayload(fault)
    }
}

/// Render `value` as exactly one word, keeping the low bytes when it is wider.
pub fn word_bytes(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= WORD_BYTES {
        return bytes[bytes.len() - WORD_BYTES..].to_vec();
    }
    let mut word = vec![0u8; WORD_BYTES - bytes.len()];
    word.extend_from_slice(&bytes);
    word
}

/// Interpret big-endian bytes of any length as an unsigned integer.
pub fn word_value(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Cursor over an encoded buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(Fault::Truncated.into());
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn hash(&mut self) -> Result<Hash, CodecError> {
        self.array::<32>()
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Unsigned big-endian integer of `width` bytes (at most 8).
    pub fn uint(&mut self, width: usize) -> Result<u64, CodecError> {
        debug_assert!(width <= 8);
        let bytes = self.take(width)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.uint(2)? as u16)
    }

    pub fn u24(&mut self) -> Result<u32, CodecError> {
        Ok(self.uint(3)? as u32)
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(self.uint(4)? as u32)
    }

    /// A biased count or length of `width` bytes.
    pub fn biased(&mut self, width: usize) -> Result<usize, CodecError> {
        Ok(self.uint(width)? as usize + 1)
    }

    /// A biased one-byte count.
    pub fn count(&mut self) -> Result<usize, CodecError> {
        self.biased(1)
    }

    /// A biased word: the stored value plus one.
    pub fn amount(&mut self) -> Result<BigUint, CodecError> {
        let bytes = self.take(WORD_BYTES)?;
        Ok(word_value(bytes) + 1u8)
    }
}

/// Growable output buffer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Unsigned big-endian integer of `width` bytes; fails if it does not fit.
    pub fn uint(&mut self, value: u64, width: usize) -> Result<(), CodecError> {
        if width < 8 && value >> (8 * width) != 0 {
            return Err(Fault::OutOfRange.into());
        }
        self.buf
            .extend_from_slice(&value.to_be_bytes()[8 - width..]);
        Ok(())
    }

    /// A biased count or length; zero never fits.
    pub fn biased(&mut self, n: usize, width: usize) -> Result<(), CodecError> {
        if n == 0 {
            return Err(Fault::OutOfRange.into());
        }
        self.uint(n as u64 - 1, width)
    }

    pub fn count(&mut self, n: usize) -> Result<(), CodecError> {
        self.biased(n, 1)
    }

    /// A biased word. Zero cannot be encoded; values past the word keep their low bytes.
    pub fn amount(&mut self, amount: &BigUint) -> Result<(), CodecError> {
        if amount.is_zero() {
            return Err(Fault::OutOfRange.into());
        }
        let stored = amount - BigUint::one();
        self.buf.extend_from_slice(&word_bytes(&stored));
        Ok(())
    }
}
