//! Instruction word field layout.
//!
//! ```text
//! bits [2:0]   opcode
//! bit  [3]     mode0  FETCH: top half | LOAD: weights | RUN: compute
//! bit  [4]     mode1  STORE: immediate | RUN: quantize
//! bit  [5]     mode2  RUN: relu
//! bit  [6]     unused
//! bits [15:7]  address (FETCH, LOAD, RUN)
//! ```
//!
//! STORE keeps its addresses out of the first word: the payload (or source
//! address) and the destination travel in the two words that follow.

use crate::error::{IsaError, Result};
use std::fmt;

// ── Field geometry ───────────────────────────────────────────────────────────

/// Instruction word width in bits.
pub const INSTRUCTION_WIDTH: u32 = 16;

/// Bytes per word on the wire.
pub const WORD_BYTES: usize = 2;

/// Opcode field mask (bits 0-2).
pub const OPCODE_MASK: u16 = 0b111;

/// Shift of the address field.
pub const ADDRESS_SHIFT: u32 = 7;

/// Address field mask after shifting.
pub const ADDRESS_FIELD_MASK: u16 = 0x1FF;

// ── Mode bits ────────────────────────────────────────────────────────────────

/// STORE control word bits.
pub mod store {
    /// Payload word carries packed values rather than a source address.
    pub const IMMEDIATE: u16 = 1 << 4;
}

/// FETCH bits.
pub mod fetch {
    /// Select the high byte of the word.
    pub const TOP_HALF: u16 = 1 << 3;
}

/// LOAD bits.
pub mod load {
    /// Load into the weight registers rather than the input registers.
    pub const WEIGHTS: u16 = 1 << 3;
}

/// RUN bits.
pub mod run {
    /// Enable the multiply-accumulate array.
    pub const COMPUTE: u16 = 1 << 3;
    /// Enable the int4 quantizer.
    pub const QUANTIZE: u16 = 1 << 4;
    /// Enable the leaky ReLU stage.
    pub const RELU: u16 = 1 << 5;
}

/// 3-bit operation selector.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Write a value or copy a word into the buffer (three words).
    Store = 0b000,
    /// Read one byte of a buffer word back over the link.
    Fetch = 0b001,
    /// Run compute on the loaded operands.
    Run = 0b010,
    /// Move a buffer word into the compute array.
    Load = 0b011,
    /// Stop execution.
    Halt = 0b100,
    /// No operation.
    Nop = 0b101,
}

impl Opcode {
    /// Opcode bits of `word`.
    ///
    /// # Errors
    ///
    /// Returns [`IsaError::UnknownOpcode`] for `0b110` and `0b111`.
    pub const fn from_word(word: u16) -> Result<Self> {
        match word & OPCODE_MASK {
            0b000 => Ok(Self::Store),
            0b001 => Ok(Self::Fetch),
            0b010 => Ok(Self::Run),
            0b011 => Ok(Self::Load),
            0b100 => Ok(Self::Halt),
            0b101 => Ok(Self::Nop),
            opcode => Err(IsaError::UnknownOpcode { opcode, word }),
        }
    }

    /// Raw field value.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self as u16
    }

    /// Words occupied by an instruction with this opcode.
    #[must_use]
    pub const fn word_count(self) -> usize {
        match self {
            Self::Store => 3,
            _ => 1,
        }
    }

    /// Assembler mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Store => "STORE",
            Self::Fetch => "FETCH",
            Self::Run => "RUN",
            Self::Load => "LOAD",
            Self::Halt => "HALT",
            Self::Nop => "NOP",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
