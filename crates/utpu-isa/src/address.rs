//! Unified buffer address space.
//!
//! The chip has a single 512-word operand/result buffer addressed with nine
//! bits. By convention callers split it into four 128-word sections; the
//! encoder does not enforce the split.
//!
//! | Section | Range | Typical use |
//! |---------|-------|-------------|
//! | A | `0x000-0x07F` | inputs |
//! | B | `0x080-0x0FF` | weights |
//! | C | `0x100-0x17F` | results |
//! | D | `0x180-0x1FF` | scratch |

use crate::error::{IsaError, Result};
use std::fmt;

/// Width of the address field in bits.
pub const ADDRESS_BITS: u32 = 9;

/// Number of addressable buffer words.
pub const BUFFER_WORDS: usize = 1 << ADDRESS_BITS;

/// Highest valid address.
pub const MAX_ADDRESS: u16 = (BUFFER_WORDS - 1) as u16;

/// Words per buffer section.
pub const SECTION_WORDS: u16 = 0x080;

/// Validated 9-bit buffer address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u16);

impl Address {
    /// Validate an address.
    ///
    /// # Errors
    ///
    /// Returns [`IsaError::AddressOutOfRange`] outside `0..=511`.
    pub fn new(addr: i32) -> Result<Self> {
        u16::try_from(addr)
            .ok()
            .filter(|&a| a <= MAX_ADDRESS)
            .map(Self)
            .ok_or_else(|| IsaError::address_out_of_range(addr))
    }

    /// Address from an already-masked 9-bit instruction field.
    pub(crate) const fn from_field(raw: u16) -> Self {
        Self(raw & MAX_ADDRESS)
    }

    /// Address as a raw integer.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Address `offset` words further on.
    ///
    /// # Errors
    ///
    /// Returns [`IsaError::AddressOutOfRange`] if the result leaves the buffer.
    pub fn offset(self, offset: usize) -> Result<Self> {
        let next = usize::from(self.0).saturating_add(offset);
        i32::try_from(next)
            .map_err(|_| IsaError::address_out_of_range(i64::MAX))
            .and_then(Self::new)
    }

    /// Section this address falls into.
    #[must_use]
    pub const fn section(self) -> BufferSection {
        match self.0 / SECTION_WORDS {
            0 => BufferSection::A,
            1 => BufferSection::B,
            2 => BufferSection::C,
            _ => BufferSection::D,
        }
    }
}

/// Validate a raw address (free-function form of [`Address::new`]).
///
/// # Errors
///
/// Returns [`IsaError::AddressOutOfRange`] outside `0..=511`.
pub fn validate_address(addr: i32) -> Result<Address> {
    Address::new(addr)
}

impl TryFrom<i32> for Address {
    type Error = IsaError;

    fn try_from(addr: i32) -> Result<Self> {
        Self::new(addr)
    }
}

impl From<Address> for u16 {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X}", self.0)
    }
}

/// Named 128-word buffer section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferSection {
    /// `0x000-0x07F`
    A,
    /// `0x080-0x0FF`
    B,
    /// `0x100-0x17F`
    C,
    /// `0x180-0x1FF`
    D,
}

impl BufferSection {
    /// All sections in address order.
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// First address of the section.
    #[must_use]
    pub const fn base(self) -> Address {
        Address(self.index() * SECTION_WORDS)
    }

    /// Last address of the section.
    #[must_use]
    pub const fn end(self) -> Address {
        Address(self.index() * SECTION_WORDS + SECTION_WORDS - 1)
    }

    const fn index(self) -> u16 {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
        }
    }
}

impl fmt::Display for BufferSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        };
        write!(f, "section {name} ({}-{})", self.base(), self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_valid_address_round_trips() {
        for a in 0..=511 {
            assert_eq!(i32::from(validate_address(a).unwrap().get()), a);
        }
    }

    #[test]
    fn out_of_range_addresses_rejected() {
        for a in [-1, 512, 1000, i32::MIN, i32::MAX] {
            assert_eq!(
                validate_address(a),
                Err(IsaError::AddressOutOfRange { addr: i64::from(a) })
            );
        }
    }

    #[test]
    fn section_map() {
        assert_eq!(BufferSection::A.base().get(), 0x000);
        assert_eq!(BufferSection::B.base().get(), 0x080);
        assert_eq!(BufferSection::C.base().get(), 0x100);
        assert_eq!(BufferSection::D.base().get(), 0x180);
        assert_eq!(BufferSection::D.end().get(), MAX_ADDRESS);
        assert_eq!(Address::new(0x17F).unwrap().section(), BufferSection::C);
    }

    #[test]
    fn offset_stays_in_buffer() {
        let base = Address::new(510).unwrap();
        assert_eq!(base.offset(1).unwrap().get(), 511);
        assert!(base.offset(2).is_err());
    }
}
