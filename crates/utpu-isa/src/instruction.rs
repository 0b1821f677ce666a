//! Instruction encoding and decoding.
//!
//! Every `encode_*` function validates its inputs and returns an
//! [`Instruction`]; [`Instruction::encode`] turns it into words and
//! [`Instruction::write_to`] serializes those words little-endian.
//!
//! ## Encodings
//!
//! ```text
//! STORE imm   [0b000 | IMMEDIATE] [packed int4 x4] [dest]
//! STORE copy  [0b000]             [src]            [dest]
//! FETCH       0b001 | top<<3     | addr<<7
//! RUN         0b010 | c<<3 | q<<4 | r<<5 | addr<<7
//! LOAD        0b011 | weights<<3 | addr<<7
//! HALT        0b100
//! NOP         0b101
//! ```

use crate::address::Address;
use crate::error::{IsaError, Result};
use crate::nibble::{pack_nibbles, Int4};
use crate::opcode::{self, Opcode, ADDRESS_FIELD_MASK, ADDRESS_SHIFT, WORD_BYTES};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Most words any instruction occupies (STORE).
pub const MAX_INSTRUCTION_WORDS: usize = 3;

/// Which byte of a buffer word a FETCH returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchHalf {
    /// Low byte: lanes 0 and 1.
    Bottom,
    /// High byte: lanes 2 and 3.
    Top,
}

impl FetchHalf {
    /// Half selected by a `top_half` flag.
    #[must_use]
    pub const fn from_top(top_half: bool) -> Self {
        if top_half {
            Self::Top
        } else {
            Self::Bottom
        }
    }
}

/// Destination register bank for LOAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadTarget {
    /// Input activations.
    Inputs,
    /// Weight matrix.
    Weights,
}

/// Independent RUN stage enables. Any combination is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunFlags {
    /// Multiply-accumulate.
    pub compute: bool,
    /// Int4 quantizer.
    pub quantize: bool,
    /// Leaky ReLU.
    pub relu: bool,
}

impl RunFlags {
    /// All stages enabled.
    pub const ALL: Self = Self::new(true, true, true);
    /// All stages disabled.
    pub const NONE: Self = Self::new(false, false, false);

    /// Flags from individual enables.
    #[must_use]
    pub const fn new(compute: bool, quantize: bool, relu: bool) -> Self {
        Self {
            compute,
            quantize,
            relu,
        }
    }

    const fn bits(self) -> u16 {
        let mut bits = 0;
        if self.compute {
            bits |= opcode::run::COMPUTE;
        }
        if self.quantize {
            bits |= opcode::run::QUANTIZE;
        }
        if self.relu {
            bits |= opcode::run::RELU;
        }
        bits
    }

    const fn from_bits(word: u16) -> Self {
        Self::new(
            word & opcode::run::COMPUTE != 0,
            word & opcode::run::QUANTIZE != 0,
            word & opcode::run::RELU != 0,
        )
    }
}

impl Default for RunFlags {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Display for RunFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            return f.write_str("-");
        }
        for (on, letter) in [(self.compute, 'C'), (self.quantize, 'Q'), (self.relu, 'R')] {
            if on {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

/// Second word of a STORE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreSource {
    /// Raw 16-bit payload (normally four packed int4 lanes).
    Immediate(u16),
    /// Copy the word at this address.
    Copy(Address),
}

/// One decoded chip instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Write `source` into `dest`.
    Store {
        /// Payload or source address
        source: StoreSource,
        /// Destination address
        dest: Address,
    },
    /// Return one byte of the word at `addr`.
    Fetch {
        /// Buffer address
        addr: Address,
        /// Byte selector
        half: FetchHalf,
    },
    /// Run the array and write the result word to `result`.
    Run {
        /// Result address
        result: Address,
        /// Stage enables
        flags: RunFlags,
    },
    /// Move the word at `addr` into the array.
    Load {
        /// Buffer address
        addr: Address,
        /// Register bank
        target: LoadTarget,
    },
    /// Stop execution.
    Halt,
    /// No operation.
    Nop,
}

/// Words produced by encoding one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedInstruction {
    words: [u16; MAX_INSTRUCTION_WORDS],
    len: usize,
}

impl EncodedInstruction {
    const fn single(word: u16) -> Self {
        Self {
            words: [word, 0, 0],
            len: 1,
        }
    }

    const fn triple(words: [u16; 3]) -> Self {
        Self { words, len: 3 }
    }

    /// Encoded words in transmission order.
    #[must_use]
    pub fn words(&self) -> &[u16] {
        &self.words[..self.len]
    }

    /// Wire size in bytes.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.len * WORD_BYTES
    }

    /// Little-endian byte image.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        words_to_bytes(self.words())
    }
}

impl Instruction {
    /// Opcode of the first word.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Store { .. } => Opcode::Store,
            Self::Fetch { .. } => Opcode::Fetch,
            Self::Run { .. } => Opcode::Run,
            Self::Load { .. } => Opcode::Load,
            Self::Halt => Opcode::Halt,
            Self::Nop => Opcode::Nop,
        }
    }

    /// Words this instruction occupies.
    #[must_use]
    pub const fn word_count(&self) -> usize {
        self.opcode().word_count()
    }

    /// Encode to words.
    #[must_use]
    pub const fn encode(&self) -> EncodedInstruction {
        let op = self.opcode().bits();
        match *self {
            Self::Store { source, dest } => match source {
                StoreSource::Immediate(payload) => {
                    EncodedInstruction::triple([op | opcode::store::IMMEDIATE, payload, dest.get()])
                }
                StoreSource::Copy(src) => EncodedInstruction::triple([op, src.get(), dest.get()]),
            },
            Self::Fetch { addr, half } => {
                let top = match half {
                    FetchHalf::Top => opcode::fetch::TOP_HALF,
                    FetchHalf::Bottom => 0,
                };
                EncodedInstruction::single(op | top | addr_field(addr))
            }
            Self::Run { result, flags } => {
                EncodedInstruction::single(op | flags.bits() | addr_field(result))
            }
            Self::Load { addr, target } => {
                let weights = match target {
                    LoadTarget::Weights => opcode::load::WEIGHTS,
                    LoadTarget::Inputs => 0,
                };
                EncodedInstruction::single(op | weights | addr_field(addr))
            }
            Self::Halt | Self::Nop => EncodedInstruction::single(op),
        }
    }

    /// Little-endian byte image.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        self.encode().to_bytes()
    }

    /// Append the little-endian byte image to `out`.
    pub fn write_to(&self, out: &mut impl BufMut) {
        for &word in self.encode().words() {
            out.put_u16_le(word);
        }
    }

    /// Decode the instruction at the head of `words`.
    ///
    /// Returns the instruction and the number of words consumed. Unused
    /// bits are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`IsaError::UnknownOpcode`], [`IsaError::Truncated`] when a
    /// STORE triple is cut short, or a range error when a STORE address
    /// word exceeds nine bits.
    pub fn decode(words: &[u16]) -> Result<(Self, usize)> {
        let Some(&first) = words.first() else {
            return Err(IsaError::Truncated {
                expected: 1,
                got: 0,
            });
        };
        let op = Opcode::from_word(first)?;
        let instr = match op {
            Opcode::Store => {
                let [_, second, third] = words.get(..3).and_then(|w| <[u16; 3]>::try_from(w).ok()).ok_or(
                    IsaError::Truncated {
                        expected: 3,
                        got: words.len(),
                    },
                )?;
                let source = if first & opcode::store::IMMEDIATE != 0 {
                    StoreSource::Immediate(second)
                } else {
                    StoreSource::Copy(Address::new(i32::from(second))?)
                };
                Self::Store {
                    source,
                    dest: Address::new(i32::from(third))?,
                }
            }
            Opcode::Fetch => Self::Fetch {
                addr: addr_from_field(first),
                half: FetchHalf::from_top(first & opcode::fetch::TOP_HALF != 0),
            },
            Opcode::Run => Self::Run {
                result: addr_from_field(first),
                flags: RunFlags::from_bits(first),
            },
            Opcode::Load => Self::Load {
                addr: addr_from_field(first),
                target: if first & opcode::load::WEIGHTS != 0 {
                    LoadTarget::Weights
                } else {
                    LoadTarget::Inputs
                },
            },
            Opcode::Halt => Self::Halt,
            Opcode::Nop => Self::Nop,
        };
        Ok((instr, op.word_count()))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store {
                source: StoreSource::Immediate(payload),
                dest,
            } => write!(f, "STORE #0x{payload:04X}, {dest}"),
            Self::Store {
                source: StoreSource::Copy(src),
                dest,
            } => write!(f, "STORE {src}, {dest}"),
            Self::Fetch {
                addr,
                half: FetchHalf::Top,
            } => write!(f, "FETCHTOP {addr}"),
            Self::Fetch {
                addr,
                half: FetchHalf::Bottom,
            } => write!(f, "FETCHBOT {addr}"),
            Self::Run { result, flags } => write!(f, "RUN {result}, {flags}"),
            Self::Load {
                addr,
                target: LoadTarget::Weights,
            } => write!(f, "LOADWEI {addr}"),
            Self::Load {
                addr,
                target: LoadTarget::Inputs,
            } => write!(f, "LOADIN {addr}"),
            Self::Halt => f.write_str("HALT"),
            Self::Nop => f.write_str("NOP"),
        }
    }
}

const fn addr_field(addr: Address) -> u16 {
    addr.get() << ADDRESS_SHIFT
}

const fn addr_from_field(word: u16) -> Address {
    Address::from_field((word >> ADDRESS_SHIFT) & ADDRESS_FIELD_MASK)
}

// ── Encoder entry points ─────────────────────────────────────────────────────

/// STORE four packed int4 values at `dest`.
///
/// # Errors
///
/// Range error for a bad address or more than four values.
pub fn encode_store_immediate(dest: i32, values: &[Int4]) -> Result<Instruction> {
    let dest = Address::new(dest)?;
    Ok(Instruction::Store {
        source: StoreSource::Immediate(pack_nibbles(values)?),
        dest,
    })
}

/// STORE a raw 16-bit payload at `dest`.
///
/// # Errors
///
/// Range error for a bad address.
pub fn encode_store_word(dest: i32, payload: u16) -> Result<Instruction> {
    Ok(Instruction::Store {
        source: StoreSource::Immediate(payload),
        dest: Address::new(dest)?,
    })
}

/// STORE a copy of the word at `src` into `dest`.
///
/// # Errors
///
/// Range error for either address.
pub fn encode_store_copy(dest: i32, src: i32) -> Result<Instruction> {
    let dest = Address::new(dest)?;
    let src = Address::new(src)?;
    Ok(Instruction::Store {
        source: StoreSource::Copy(src),
        dest,
    })
}

/// LOAD the word at `addr` into the weight or input registers.
///
/// # Errors
///
/// Range error for a bad address.
pub fn encode_load(addr: i32, is_weights: bool) -> Result<Instruction> {
    Ok(Instruction::Load {
        addr: Address::new(addr)?,
        target: if is_weights {
            LoadTarget::Weights
        } else {
            LoadTarget::Inputs
        },
    })
}

/// LOAD weights from `addr`.
///
/// # Errors
///
/// Range error for a bad address.
pub fn encode_load_weights(addr: i32) -> Result<Instruction> {
    encode_load(addr, true)
}

/// LOAD inputs from `addr`.
///
/// # Errors
///
/// Range error for a bad address.
pub fn encode_load_inputs(addr: i32) -> Result<Instruction> {
    encode_load(addr, false)
}

/// RUN with the given stage enables, writing the result word to `result`.
///
/// # Errors
///
/// Range error for a bad address.
pub fn encode_run(result: i32, compute: bool, quantize: bool, relu: bool) -> Result<Instruction> {
    Ok(Instruction::Run {
        result: Address::new(result)?,
        flags: RunFlags::new(compute, quantize, relu),
    })
}

/// FETCH one byte of the word at `addr`.
///
/// # Errors
///
/// Range error for a bad address.
pub fn encode_fetch(addr: i32, top_half: bool) -> Result<Instruction> {
    Ok(Instruction::Fetch {
        addr: Address::new(addr)?,
        half: FetchHalf::from_top(top_half),
    })
}

/// HALT.
#[must_use]
pub const fn encode_halt() -> Instruction {
    Instruction::Halt
}

/// NOP.
#[must_use]
pub const fn encode_nop() -> Instruction {
    Instruction::Nop
}

/// Serialize words little-endian.
#[must_use]
pub fn words_to_bytes(words: &[u16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(words.len() * WORD_BYTES);
    for &w in words {
        buf.put_u16_le(w);
    }
    buf.freeze()
}

/// Reassemble little-endian words.
///
/// # Errors
///
/// Returns [`IsaError::Truncated`] for an odd byte count.
pub fn bytes_to_words(bytes: &[u8]) -> Result<Vec<u16>> {
    if bytes.len() % WORD_BYTES != 0 {
        return Err(IsaError::Truncated {
            expected: bytes.len() / WORD_BYTES + 1,
            got: bytes.len() / WORD_BYTES,
        });
    }
    Ok(bytes
        .chunks_exact(WORD_BYTES)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decode a complete word stream into instructions.
///
/// # Errors
///
/// Propagates the first [`Instruction::decode`] failure.
pub fn decode_all(words: &[u16]) -> Result<Vec<Instruction>> {
    let mut out = Vec::new();
    let mut rest = words;
    while !rest.is_empty() {
        let (instr, used) = Instruction::decode(rest)?;
        out.push(instr);
        rest = &rest[used..];
    }
    Ok(out)
}
