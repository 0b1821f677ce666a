//! Error types for instruction encoding and assembly

use thiserror::Error;

/// Result type alias for ISA operations
pub type Result<T> = std::result::Result<T, IsaError>;

/// Errors raised while building, decoding or assembling instructions
///
/// Every range failure is reported at construction time. Nothing in this
/// crate clamps or masks an out-of-range value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IsaError {
    /// Buffer address outside the 9-bit range
    #[error("Address {addr} out of range (0-511)")]
    AddressOutOfRange {
        /// Rejected address
        addr: i64,
    },

    /// Integer outside the signed 4-bit range
    #[error("Value {value} out of int4 range (-8..=7)")]
    ValueOutOfRange {
        /// Rejected value
        value: i64,
    },

    /// More values than fit in one 16-bit word
    #[error("Cannot pack {count} values into one word (max 4)")]
    TooManyValues {
        /// Number of values supplied
        count: usize,
    },

    /// Opcode field holds an unassigned encoding
    #[error("Unknown opcode {opcode:#05b} in word {word:#06x}")]
    UnknownOpcode {
        /// Offending opcode bits
        opcode: u16,
        /// Full instruction word
        word: u16,
    },

    /// Word stream ended in the middle of an instruction
    #[error("Truncated instruction: expected {expected} words, got {got}")]
    Truncated {
        /// Words needed to complete the instruction
        expected: usize,
        /// Words available
        got: usize,
    },

    /// Assembler rejected a source line
    #[error("Line {line}: {reason}")]
    Syntax {
        /// 1-based source line number
        line: usize,
        /// Reason for failure
        reason: String,
    },
}

impl IsaError {
    /// Create an address range error
    pub fn address_out_of_range(addr: impl Into<i64>) -> Self {
        Self::AddressOutOfRange { addr: addr.into() }
    }

    /// Create a value range error
    pub fn value_out_of_range(value: impl Into<i64>) -> Self {
        Self::ValueOutOfRange {
            value: value.into(),
        }
    }

    /// Create an assembler syntax error
    pub fn syntax(line: usize, reason: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            reason: reason.into(),
        }
    }

    /// True for the range family of errors (address, value, lane count)
    pub const fn is_range(&self) -> bool {
        matches!(
            self,
            Self::AddressOutOfRange { .. } | Self::ValueOutOfRange { .. } | Self::TooManyValues { .. }
        )
    }
}
