//! Instruction set model for the uTPU systolic-array accelerator.
//!
//! This crate has **no hardware access**; it is a pure model of what the
//! chip accepts over its serial link: 16-bit little-endian instruction
//! words, signed 4-bit operands packed four to a word, and a 512-word
//! unified buffer addressed with nine bits.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`opcode`] | Opcode values and field/bit layout |
//! | [`nibble`] | [`Int4`], nibble encode/decode, 4-lane packing |
//! | [`address`] | [`Address`] validation, buffer section map |
//! | [`instruction`] | [`Instruction`], `encode_*` entry points, decoding |
//! | [`program`] | [`Program`] byte images and [`ProgramBuilder`] |
//! | [`asm`] | Text assembler, `.mem`/`.bin` output, disassembler |
//!
//! # Wire format
//!
//! ```text
//! word     = 16 bits, low byte first
//! STORE    = 3 words (6 bytes): control, payload-or-source, destination
//! others   = 1 word  (2 bytes)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod asm;
mod error;
pub mod instruction;
pub mod nibble;
pub mod opcode;
pub mod program;

pub use address::{validate_address, Address, BufferSection, BUFFER_WORDS, MAX_ADDRESS};
pub use error::{IsaError, Result};
pub use instruction::{
    encode_fetch, encode_halt, encode_load, encode_load_inputs, encode_load_weights, encode_nop,
    encode_run, encode_store_copy, encode_store_immediate, encode_store_word, EncodedInstruction,
    FetchHalf, Instruction, LoadTarget, RunFlags, StoreSource,
};
pub use nibble::{decode_byte, decode_bytes, decode_nibble, encode_nibble, pack_nibbles, unpack_nibbles, Int4};
pub use opcode::Opcode;
pub use program::{Program, ProgramBuilder};
