//! Signed 4-bit values and nibble packing.
//!
//! An [`Int4`] lives physically in the low four bits of a byte, two's
//! complement. A 16-bit word holds four lanes, lane `i` at bit offset
//! `4 * i`; a single byte holds two, low nibble first.
//!
//! ```text
//! word:  [15:12] lane 3 | [11:8] lane 2 | [7:4] lane 1 | [3:0] lane 0
//! byte:                                   [7:4] high   | [3:0] low
//! ```

use crate::error::{IsaError, Result};
use std::fmt;

/// Lanes in one 16-bit buffer word.
pub const LANES_PER_WORD: usize = 4;

/// Lanes in one response byte.
pub const LANES_PER_BYTE: usize = 2;

const NIBBLE_MASK: u8 = 0x0F;

/// Signed integer in `-8..=7`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Int4(i8);

impl Int4 {
    /// Smallest representable value.
    pub const MIN: Self = Self(-8);
    /// Largest representable value.
    pub const MAX: Self = Self(7);
    /// Zero, used for lane padding.
    pub const ZERO: Self = Self(0);

    /// Validate an integer into the int4 range.
    ///
    /// # Errors
    ///
    /// Returns [`IsaError::ValueOutOfRange`] outside `-8..=7`.
    pub fn new(value: i32) -> Result<Self> {
        if (-8..=7).contains(&value) {
            #[allow(clippy::cast_possible_truncation)]
            Ok(Self(value as i8))
        } else {
            Err(IsaError::value_out_of_range(value))
        }
    }

    /// Validate a slice of integers.
    ///
    /// # Errors
    ///
    /// Returns the first range failure.
    pub fn from_slice(values: &[i32]) -> Result<Vec<Self>> {
        values.iter().map(|&v| Self::new(v)).collect()
    }

    /// Sign-extend the low four bits of `raw`. Upper bits are ignored.
    #[must_use]
    pub const fn from_nibble(raw: u8) -> Self {
        let nibble = (raw & NIBBLE_MASK) as i8;
        if nibble >= 8 {
            Self(nibble - 16)
        } else {
            Self(nibble)
        }
    }

    /// Two's-complement nibble in the low four bits.
    #[must_use]
    pub const fn to_nibble(self) -> u8 {
        #[allow(clippy::cast_sign_loss)]
        let raw = self.0 as u8;
        raw & NIBBLE_MASK
    }

    /// Value as a plain integer.
    #[must_use]
    pub const fn get(self) -> i8 {
        self.0
    }
}

impl TryFrom<i32> for Int4 {
    type Error = IsaError;

    fn try_from(value: i32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Int4> for i32 {
    fn from(v: Int4) -> Self {
        Self::from(v.0)
    }
}

impl fmt::Display for Int4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encode one value as a raw nibble.
#[must_use]
pub const fn encode_nibble(value: Int4) -> u8 {
    value.to_nibble()
}

/// Decode the low nibble of `raw` as a signed value.
#[must_use]
pub const fn decode_nibble(raw: u8) -> Int4 {
    Int4::from_nibble(raw)
}

/// Pack up to four values into a word, lane 0 first; missing lanes are zero.
///
/// # Errors
///
/// Returns [`IsaError::TooManyValues`] for more than four values.
pub fn pack_nibbles(values: &[Int4]) -> Result<u16> {
    if values.len() > LANES_PER_WORD {
        return Err(IsaError::TooManyValues {
            count: values.len(),
        });
    }
    Ok(values
        .iter()
        .enumerate()
        .fold(0u16, |word, (lane, v)| word | (u16::from(v.to_nibble()) << (4 * lane))))
}

/// Split a word into its four lanes, lane 0 first.
#[must_use]
pub fn unpack_nibbles(word: u16) -> [Int4; LANES_PER_WORD] {
    let mut lanes = [Int4::ZERO; LANES_PER_WORD];
    for (lane, slot) in lanes.iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let raw = (word >> (4 * lane)) as u8;
        *slot = Int4::from_nibble(raw);
    }
    lanes
}

/// Decode a byte into its (low, high) nibble pair.
#[must_use]
pub const fn decode_byte(byte: u8) -> [Int4; LANES_PER_BYTE] {
    [Int4::from_nibble(byte), Int4::from_nibble(byte >> 4)]
}

/// Decode every byte of a response stream into two values each.
#[must_use]
pub fn decode_bytes(bytes: &[u8]) -> Vec<Int4> {
    bytes.iter().flat_map(|&b| decode_byte(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int4s(values: &[i32]) -> Vec<Int4> {
        Int4::from_slice(values).unwrap()
    }

    #[test]
    fn nibble_round_trip_full_domain() {
        for v in -8..=7 {
            let x = Int4::new(v).unwrap();
            assert_eq!(decode_nibble(encode_nibble(x)), x, "value {v}");
        }
    }

    #[test]
    fn out_of_range_values_rejected() {
        assert_eq!(Int4::new(8), Err(IsaError::ValueOutOfRange { value: 8 }));
        assert_eq!(Int4::new(-9), Err(IsaError::ValueOutOfRange { value: -9 }));
        assert!(Int4::from_slice(&[1, 2, 100]).is_err());
    }

    #[test]
    fn high_nibbles_sign_extend() {
        assert_eq!(Int4::from_nibble(0x8).get(), -8);
        assert_eq!(Int4::from_nibble(0xF).get(), -1);
        assert_eq!(Int4::from_nibble(0x7).get(), 7);
        // upper bits are not part of the value
        assert_eq!(Int4::from_nibble(0xF3).get(), 3);
    }

    #[test]
    fn pack_places_lane_zero_lowest() {
        let word = pack_nibbles(&int4s(&[1, 2, 3, 4])).unwrap();
        assert_eq!(word, 0x4321);
        assert_eq!(unpack_nibbles(word), int4s(&[1, 2, 3, 4]).as_slice());
    }

    #[test]
    fn pack_zero_pads_short_input() {
        assert_eq!(pack_nibbles(&int4s(&[1, 1])).unwrap(), 0x0011);
        assert_eq!(pack_nibbles(&[]).unwrap(), 0);
    }

    #[test]
    fn pack_negative_values() {
        let word = pack_nibbles(&int4s(&[-1, 0, -8, 7])).unwrap();
        assert_eq!(word, 0x780F);
        assert_eq!(unpack_nibbles(word), int4s(&[-1, 0, -8, 7]).as_slice());
    }

    #[test]
    fn pack_rejects_fifth_lane() {
        let err = pack_nibbles(&int4s(&[1, 2, 3, 4, 5])).unwrap_err();
        assert_eq!(err, IsaError::TooManyValues { count: 5 });
        assert!(err.is_range());
    }

    #[test]
    fn byte_decode_low_then_high() {
        assert_eq!(decode_byte(0x21), [Int4::new(1).unwrap(), Int4::new(2).unwrap()]);
        assert_eq!(decode_bytes(&[0xF8, 0x07]), int4s(&[-8, -1, 7, 0]));
    }
}
