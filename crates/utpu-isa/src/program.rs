//! Linear instruction programs.
//!
//! A [`Program`] is the byte image the chip executes in order. Programs are
//! built with [`ProgramBuilder`], which only accumulates: it adds no
//! semantics beyond ordering and concatenation.
//!
//! ```
//! use utpu_isa::{Int4, ProgramBuilder};
//!
//! # fn main() -> Result<(), utpu_isa::IsaError> {
//! let mut b = ProgramBuilder::new();
//! b.store(0x080, &Int4::from_slice(&[1, 2, 3, 4])?)?
//!     .load_weights(0x080)?
//!     .run(0x100, Default::default())?
//!     .halt();
//! let program = b.build();
//! assert_eq!(program.instruction_count(), 4);
//! assert_eq!(program.len(), 6 + 2 + 2 + 2);
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::instruction::{self, bytes_to_words, decode_all, Instruction, RunFlags};
use crate::nibble::Int4;
use bytes::{Bytes, BytesMut};

/// Encoded program ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    bytes: Bytes,
    instruction_count: usize,
}

impl Program {
    /// Program from already-encoded instructions.
    #[must_use]
    pub fn from_instructions(instructions: &[Instruction]) -> Self {
        let size = instructions.iter().map(|i| i.encode().byte_len()).sum();
        let mut buf = BytesMut::with_capacity(size);
        for instr in instructions {
            instr.write_to(&mut buf);
        }
        Self {
            bytes: buf.freeze(),
            instruction_count: instructions.len(),
        }
    }

    /// Program from a raw binary image, validating every instruction.
    ///
    /// # Errors
    ///
    /// Fails on an odd byte count, unknown opcode or truncated STORE.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        let instructions = decode_all(&bytes_to_words(&bytes)?)?;
        Ok(Self {
            bytes,
            instruction_count: instructions.len(),
        })
    }

    /// Wire image.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Wire image, cheaply cloned.
    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a program with no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of instructions (a STORE counts once).
    #[must_use]
    pub const fn instruction_count(&self) -> usize {
        self.instruction_count
    }

    /// Split into transmission chunks of at most `chunk_size` bytes.
    ///
    /// Chunks may split an instruction; the chip reassembles words from
    /// the byte stream.
    #[must_use]
    pub fn chunks(&self, chunk_size: usize) -> Vec<&[u8]> {
        self.bytes.chunks(chunk_size.max(1)).collect()
    }

    /// Decode back into instructions.
    ///
    /// # Errors
    ///
    /// Only fails for programs built from unchecked bytes, which the
    /// constructors do not allow.
    pub fn instructions(&self) -> Result<Vec<Instruction>> {
        decode_all(&bytes_to_words(&self.bytes)?)
    }
}

/// Append-only instruction accumulator.
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    instructions: Vec<Instruction>,
}

impl ProgramBuilder {
    /// Empty builder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            instructions: Vec::new(),
        }
    }

    /// Append an already-built instruction.
    pub fn push(&mut self, instr: Instruction) -> &mut Self {
        self.instructions.push(instr);
        self
    }

    /// STORE up to four values at `addr`.
    ///
    /// # Errors
    ///
    /// Range error for a bad address or too many values.
    pub fn store(&mut self, addr: i32, values: &[Int4]) -> Result<&mut Self> {
        let instr = instruction::encode_store_immediate(addr, values)?;
        Ok(self.push(instr))
    }

    /// STORE a copy of `src` into `dest`.
    ///
    /// # Errors
    ///
    /// Range error for either address.
    pub fn store_copy(&mut self, dest: i32, src: i32) -> Result<&mut Self> {
        let instr = instruction::encode_store_copy(dest, src)?;
        Ok(self.push(instr))
    }

    /// LOAD weights from `addr`.
    ///
    /// # Errors
    ///
    /// Range error for a bad address.
    pub fn load_weights(&mut self, addr: i32) -> Result<&mut Self> {
        let instr = instruction::encode_load_weights(addr)?;
        Ok(self.push(instr))
    }

    /// LOAD inputs from `addr`.
    ///
    /// # Errors
    ///
    /// Range error for a bad address.
    pub fn load_inputs(&mut self, addr: i32) -> Result<&mut Self> {
        let instr = instruction::encode_load_inputs(addr)?;
        Ok(self.push(instr))
    }

    /// RUN writing the result to `result_addr`.
    ///
    /// # Errors
    ///
    /// Range error for a bad address.
    pub fn run(&mut self, result_addr: i32, flags: RunFlags) -> Result<&mut Self> {
        let instr =
            instruction::encode_run(result_addr, flags.compute, flags.quantize, flags.relu)?;
        Ok(self.push(instr))
    }

    /// FETCH one half of the word at `addr`.
    ///
    /// # Errors
    ///
    /// Range error for a bad address.
    pub fn fetch(&mut self, addr: i32, top_half: bool) -> Result<&mut Self> {
        let instr = instruction::encode_fetch(addr, top_half)?;
        Ok(self.push(instr))
    }

    /// HALT.
    pub fn halt(&mut self) -> &mut Self {
        self.push(instruction::encode_halt())
    }

    /// NOP.
    pub fn nop(&mut self) -> &mut Self {
        self.push(instruction::encode_nop())
    }

    /// Concatenated byte image of everything appended so far.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        self.build().bytes
    }

    /// Snapshot the current contents as a [`Program`].
    #[must_use]
    pub fn build(&self) -> Program {
        Program::from_instructions(&self.instructions)
    }

    /// Instructions appended so far.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions appended so far.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Forget everything appended so far.
    pub fn clear(&mut self) {
        self.instructions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int4s(values: &[i32]) -> Vec<Int4> {
        Int4::from_slice(values).unwrap()
    }

    #[test]
    fn builder_concatenates_in_order() {
        let mut b = ProgramBuilder::new();
        b.store(0x080, &int4s(&[5, 6, 7, 7])).unwrap()
            .load_weights(0x080).unwrap()
            .store(0x000, &int4s(&[1, 2, 0, 0])).unwrap()
            .load_inputs(0x000).unwrap()
            .run(0x100, RunFlags::ALL).unwrap()
            .fetch(0x100, true).unwrap()
            .halt();

        assert_eq!(b.instruction_count(), 7);
        let bytes = b.to_bytes();
        assert_eq!(bytes.len(), 6 + 2 + 6 + 2 + 2 + 2 + 2);
        assert_eq!(
            bytes.as_ref(),
            &[
                0x10, 0x00, 0x65, 0x77, 0x80, 0x00, // STORE #0x7765, 0x080
                0x0B, 0x40, // LOADWEI 0x080
                0x10, 0x00, 0x21, 0x00, 0x00, 0x00, // STORE #0x0021, 0x000
                0x03, 0x00, // LOADIN 0x000
                0x3A, 0x80, // RUN 0x100, CQR
                0x09, 0x80, // FETCHTOP 0x100
                0x04, 0x00, // HALT
            ]
        );
    }

    #[test]
    fn failed_append_leaves_builder_unchanged() {
        let mut b = ProgramBuilder::new();
        b.nop();
        assert!(b.load_inputs(512).is_err());
        assert!(b.fetch(-1, false).is_err());
        assert_eq!(b.instruction_count(), 1);
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut b = ProgramBuilder::new();
        b.halt().nop();
        b.clear();
        assert_eq!(b.instruction_count(), 0);
        assert!(b.build().is_empty());
    }

    #[test]
    fn program_round_trips_through_bytes() {
        let mut b = ProgramBuilder::new();
        b.store_copy(0x010, 0x020).unwrap().fetch(0x010, false).unwrap().halt();
        let program = b.build();
        let reparsed = Program::from_bytes(program.bytes()).unwrap();
        assert_eq!(reparsed, program);
        assert_eq!(reparsed.instructions().unwrap(), b.instructions());
    }

    #[test]
    fn chunking_covers_every_byte() {
        let mut b = ProgramBuilder::new();
        for addr in 0..100 {
            b.fetch(addr, false).unwrap();
        }
        let program = b.build();
        let chunks = program.chunks(128);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 128);
        assert_eq!(chunks[1].len(), 72);
    }
}
