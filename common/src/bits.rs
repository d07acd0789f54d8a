//! Bit-Stream Codec
//!
//! Packs fixed-width unsigned fields MSB-first into a byte buffer and reads
//! them back in the same order, the way 3GPP layer 2 headers are laid out on
//! the wire. Fields are not byte aligned unless [`BitWriter::pad_to_octet`]
//! is called explicitly.

use std::ops::Add;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::utils::bits_to_bytes;

/// Bit codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitError {
    #[error("Not enough bits: need {need}, have {have}")]
    NotEnoughBits { need: usize, have: usize },
}

/// Mask covering the low `width` bits
fn mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

/// A fixed-width unsigned field.
///
/// `a + b` concatenates two fields: the result is `a.width() + b.width()`
/// bits wide and its bit pattern is `a` followed by `b`. This keeps header
/// layouts readable as a single expression:
///
/// ```
/// use common::bits::{BitWriter, Field};
///
/// let mut writer = BitWriter::new();
/// writer.push(Field::flag(true) + Field::new(3, 0b101) + Field::new(4, 0));
/// assert_eq!(writer.freeze().as_ref(), &[0b1101_0000]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    width: u32,
    value: u32,
}

impl Field {
    /// Create a field. Debug builds assert that `value` fits in `width`
    /// bits; release builds truncate.
    pub fn new(width: u32, value: u32) -> Self {
        debug_assert!(width <= 32, "field wider than 32 bits: {}", width);
        debug_assert!(
            value <= mask(width),
            "value {} does not fit in {} bits",
            value,
            width
        );
        Self {
            width,
            value: value & mask(width),
        }
    }

    /// A single-bit field
    pub fn flag(bit: bool) -> Self {
        Self::new(1, bit as u32)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn value(&self) -> u32 {
        self.value
    }
}

impl Add for Field {
    type Output = Field;

    fn add(self, rhs: Field) -> Field {
        debug_assert!(self.width + rhs.width <= 32);
        Field {
            width: self.width + rhs.width,
            value: self.value.checked_shl(rhs.width).unwrap_or(0) | rhs.value,
        }
    }
}

/// Append-only bit writer over an owned, growable buffer.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    data: BytesMut,
    bit_len: usize,
}

impl BitWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with room for `bytes` bytes
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(bytes),
            bit_len: 0,
        }
    }

    /// Append a single bit
    pub fn push_bit(&mut self, bit: bool) -> &mut Self {
        let byte_index = self.bit_len / 8;
        if byte_index >= self.data.len() {
            self.data.put_u8(0);
        }
        if bit {
            self.data[byte_index] |= 1 << (7 - self.bit_len % 8);
        }
        self.bit_len += 1;
        self
    }

    /// Append the low `width` bits of `value`, most significant first.
    ///
    /// Debug builds assert that `value` fits; release builds truncate.
    pub fn push_bits(&mut self, width: u32, value: u32) -> &mut Self {
        debug_assert!(width <= 32, "field wider than 32 bits: {}", width);
        debug_assert!(
            value <= mask(width),
            "value {} does not fit in {} bits",
            value,
            width
        );
        for i in (0..width).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        self
    }

    /// Append a field
    pub fn push(&mut self, field: Field) -> &mut Self {
        self.push_bits(field.width, field.value)
    }

    /// Zero-fill up to the next byte boundary
    pub fn pad_to_octet(&mut self) -> &mut Self {
        while self.bit_len % 8 != 0 {
            self.push_bit(false);
        }
        self
    }

    /// Append raw bytes. Fast path when the writer is byte aligned.
    pub fn put_slice(&mut self, bytes: &[u8]) -> &mut Self {
        if self.bit_len % 8 == 0 {
            self.data.put_slice(bytes);
            self.bit_len += bytes.len() * 8;
        } else {
            for &byte in bytes {
                self.push_bits(8, byte as u32);
            }
        }
        self
    }

    /// Number of bits written so far
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Number of bytes touched so far
    pub fn byte_len(&self) -> usize {
        bits_to_bytes(self.bit_len)
    }

    /// Finish writing and hand out the buffer
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }
}

/// Sequential bit reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_offset: usize,
}

impl<'a> BitReader<'a> {
    /// Start reading at the first bit of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_offset: 0,
        }
    }

    /// Bits left to read
    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit_offset
    }

    /// Bits consumed so far
    pub fn bit_offset(&self) -> usize {
        self.bit_offset
    }

    /// Bytes consumed so far, counting a partially read byte as consumed
    pub fn byte_offset(&self) -> usize {
        bits_to_bytes(self.bit_offset)
    }

    /// Read a single bit
    pub fn read_bit(&mut self) -> Result<bool, BitError> {
        if self.remaining_bits() == 0 {
            return Err(BitError::NotEnoughBits { need: 1, have: 0 });
        }
        let i = self.bit_offset;
        self.bit_offset += 1;
        Ok((self.data[i / 8] >> (7 - i % 8)) & 1 == 1)
    }

    /// Read a `width`-bit unsigned integer, most significant bit first
    pub fn read_bits(&mut self, width: u32) -> Result<u32, BitError> {
        debug_assert!(width <= 32, "field wider than 32 bits: {}", width);
        let need = width as usize;
        if need > self.remaining_bits() {
            return Err(BitError::NotEnoughBits {
                need,
                have: self.remaining_bits(),
            });
        }
        let mut value = 0u32;
        for _ in 0..width {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }
}
