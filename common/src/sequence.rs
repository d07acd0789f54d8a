//! Modular Sequence Numbers
//!
//! Unsigned counters modulo 2^BITS with wraparound-aware ordering. Every
//! window boundary test in the protocol goes through these comparisons;
//! raw integer comparison breaks as soon as the counter wraps.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Sequence number in a ring of 2^BITS values.
///
/// `a < b` holds when the signed residue of `b - a`, read as a BITS-wide
/// two's-complement integer, is strictly positive. Two numbers exactly half
/// a ring apart are unordered: neither `<` nor `>` holds and `partial_cmp`
/// returns `None`.
///
/// `BITS` must lie in `1..=31`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SeqNum<const BITS: u32>(u32);

impl<const BITS: u32> SeqNum<BITS> {
    /// Field width in bits
    pub const WIDTH: u32 = BITS;
    /// Largest representable value
    pub const MASK: u32 = (1u32 << BITS) - 1;
    /// Half the ring: the ambiguous distance
    pub const HALF: u32 = 1u32 << (BITS - 1);

    /// Create a sequence number, reducing `value` modulo 2^BITS
    pub fn new(value: u32) -> Self {
        Self(value & Self::MASK)
    }

    /// Get the raw value
    pub fn value(self) -> u32 {
        self.0
    }

    /// Signed distance `self - rhs` in the ring, in `-HALF..HALF`
    pub fn diff(self, rhs: Self) -> i32 {
        let raw = self.0.wrapping_sub(rhs.0) & Self::MASK;
        if raw & Self::HALF != 0 {
            (raw as i64 - (1i64 << BITS)) as i32
        } else {
            raw as i32
        }
    }

    /// Unsigned distance going forward from `base` to `self`, in `0..2^BITS`.
    ///
    /// Unlike [`SeqNum::diff`] this stays meaningful for a window spanning
    /// exactly half the ring.
    pub fn distance_from(self, base: Self) -> u32 {
        self.0.wrapping_sub(base.0) & Self::MASK
    }

    /// Move by a signed amount
    pub fn offset(self, delta: i32) -> Self {
        Self::new(self.0.wrapping_add(delta as u32))
    }

    /// Iterate forward `self, self + 1, ..` up to but excluding `end`
    pub fn range_to(self, end: Self) -> impl DoubleEndedIterator<Item = Self> {
        let count = end.distance_from(self);
        (0..count).map(move |i| self + i)
    }
}

impl<const BITS: u32> PartialOrd for SeqNum<BITS> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let d = self.diff(*other);
        if d == 0 {
            Some(Ordering::Equal)
        } else if d == -(Self::HALF as i64) as i32 {
            None
        } else if d > 0 {
            Some(Ordering::Greater)
        } else {
            Some(Ordering::Less)
        }
    }
}

impl<const BITS: u32> Add<u32> for SeqNum<BITS> {
    type Output = Self;

    fn add(self, rhs: u32) -> Self {
        Self::new(self.0.wrapping_add(rhs))
    }
}

impl<const BITS: u32> Sub<u32> for SeqNum<BITS> {
    type Output = Self;

    fn sub(self, rhs: u32) -> Self {
        Self::new(self.0.wrapping_sub(rhs))
    }
}

impl<const BITS: u32> AddAssign<u32> for SeqNum<BITS> {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl<const BITS: u32> SubAssign<u32> for SeqNum<BITS> {
    fn sub_assign(&mut self, rhs: u32) {
        *self = *self - rhs;
    }
}

impl<const BITS: u32> fmt::Display for SeqNum<BITS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
