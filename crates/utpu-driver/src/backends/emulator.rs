// SPDX-License-Identifier: AGPL-3.0-only

//! Chip emulator backend
//!
//! A byte-accurate behavioural model of the accelerator's UART front end
//! and 2×2 systolic array. It consumes exactly the byte stream the loader
//! would put on the wire and answers FETCHes the way the silicon does, so
//! every loader path and CLI probe can run without an FPGA attached.
//!
//! ## Model
//!
//! ```text
//! bytes ──► word assembler ──► decoder ──┬─► STORE  → buffer[dest]
//!  (LE pairs)                  (STORE    ├─► LOAD   → weight / input regs
//!                               = 3 wds) ├─► RUN    → acc → quantize → relu → buffer[result]
//!                                        ├─► FETCH  → one response byte
//!                                        └─► HALT   → halt counter
//! ```
//!
//! The array computes `out[r] = w[2r]·x0 + w[2r+1]·x1`. Quantize zeroes any
//! output outside the Int4 range; relu is leaky (`v >> 2` for negatives).
//! Output `r` lands in the low nibble of byte `r` of the result word, which
//! is why a matmul readback takes one FETCH per output.
//!
//! There is no timing model: responses are available as soon as the
//! command that produced them has been written.

use crate::error::{Result, UtpuError};
use crate::transport::{Transport, TransportType};
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace, warn};
use utpu_isa::{FetchHalf, Instruction, Int4, LoadTarget, Opcode, RunFlags, StoreSource, BUFFER_WORDS};

/// Byte the chip emits once after configuration
pub const SELF_TEST_BYTE: u8 = 0xAA;

/// Behavioural model of the chip
#[derive(Debug)]
pub struct ChipEmulator {
    /// Unified buffer (512 words)
    buffer: Vec<u16>,
    /// Weight register, row-major 2×2
    weights: [Int4; 4],
    /// Input register
    inputs: [Int4; 2],
    /// Accumulators from the last computing RUN
    acc: [i32; 2],

    /// Low byte waiting for its high byte
    pending_byte: Option<u8>,
    /// Words of an instruction not yet complete (STORE needs three)
    pending_words: Vec<u16>,

    /// Response bytes not yet read by the host
    tx: VecDeque<u8>,

    bytes_consumed: usize,
    instructions_executed: usize,
    halt_count: usize,
    closed: bool,
}

impl Default for ChipEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipEmulator {
    /// Emulator with a cleared buffer and empty registers
    #[must_use]
    pub fn new() -> Self {
        debug!("Creating chip emulator ({} word buffer)", BUFFER_WORDS);
        Self {
            buffer: vec![0; BUFFER_WORDS],
            weights: [Int4::ZERO; 4],
            inputs: [Int4::ZERO; 2],
            acc: [0; 2],
            pending_byte: None,
            pending_words: Vec::with_capacity(3),
            tx: VecDeque::new(),
            bytes_consumed: 0,
            instructions_executed: 0,
            halt_count: 0,
            closed: false,
        }
    }

    /// Emulator that has just emitted the post-configuration self-test byte
    #[must_use]
    pub fn with_self_test() -> Self {
        let mut emu = Self::new();
        emu.tx.push_back(SELF_TEST_BYTE);
        emu
    }

    /// Buffer word at `addr`, or `None` past the end
    #[must_use]
    pub fn buffer_word(&self, addr: usize) -> Option<u16> {
        self.buffer.get(addr).copied()
    }

    /// Current weight register
    #[must_use]
    pub const fn weights(&self) -> [Int4; 4] {
        self.weights
    }

    /// Current input register
    #[must_use]
    pub const fn inputs(&self) -> [Int4; 2] {
        self.inputs
    }

    /// HALTs seen so far
    #[must_use]
    pub const fn halt_count(&self) -> usize {
        self.halt_count
    }

    /// Complete instructions executed so far
    #[must_use]
    pub const fn instructions_executed(&self) -> usize {
        self.instructions_executed
    }

    /// Bytes written by the host so far
    #[must_use]
    pub const fn bytes_consumed(&self) -> usize {
        self.bytes_consumed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(UtpuError::Closed)
        } else {
            Ok(())
        }
    }

    fn push_byte(&mut self, byte: u8) {
        self.bytes_consumed += 1;
        match self.pending_byte.take() {
            None => self.pending_byte = Some(byte),
            Some(lo) => self.push_word(u16::from_le_bytes([lo, byte])),
        }
    }

    fn push_word(&mut self, word: u16) {
        self.pending_words.push(word);

        let needed = match Opcode::from_word(self.pending_words[0]) {
            Ok(op) => op.word_count(),
            Err(e) => {
                warn!("Emulator dropping word: {e}");
                self.pending_words.clear();
                return;
            }
        };
        if self.pending_words.len() < needed {
            return;
        }

        let words = std::mem::take(&mut self.pending_words);
        match Instruction::decode(&words) {
            Ok((insn, _)) => self.execute(insn),
            Err(e) => warn!("Emulator dropping instruction: {e}"),
        }
    }

    fn execute(&mut self, insn: Instruction) {
        trace!("emu: {insn}");
        self.instructions_executed += 1;

        match insn {
            Instruction::Store { source, dest } => {
                let word = match source {
                    StoreSource::Immediate(w) => w,
                    StoreSource::Copy(src) => self.buffer[usize::from(src.get())],
                };
                self.buffer[usize::from(dest.get())] = word;
            }
            Instruction::Load { addr, target } => {
                let lanes = utpu_isa::unpack_nibbles(self.buffer[usize::from(addr.get())]);
                match target {
                    LoadTarget::Weights => self.weights = lanes,
                    LoadTarget::Inputs => self.inputs = [lanes[0], lanes[1]],
                }
            }
            Instruction::Run { result, flags } => {
                let out = self.run(flags);
                self.buffer[usize::from(result.get())] = out;
            }
            Instruction::Fetch { addr, half } => {
                let [lo, hi] = self.buffer[usize::from(addr.get())].to_le_bytes();
                self.tx.push_back(match half {
                    FetchHalf::Bottom => lo,
                    FetchHalf::Top => hi,
                });
            }
            Instruction::Halt => {
                self.halt_count += 1;
                debug!("Emulator HALT #{}", self.halt_count);
            }
            Instruction::Nop => {}
        }
    }

    /// One pass through the array; returns the result word.
    fn run(&mut self, flags: RunFlags) -> u16 {
        if flags.compute {
            let w: [i32; 4] = self.weights.map(i32::from);
            let x: [i32; 2] = self.inputs.map(i32::from);
            self.acc = [w[0] * x[0] + w[1] * x[1], w[2] * x[0] + w[3] * x[1]];
        }

        let mut word = 0u16;
        for (r, &v) in self.acc.iter().enumerate() {
            let mut v = v;
            if flags.quantize && Int4::new(v).is_err() {
                v = 0;
            }
            if flags.relu && v < 0 {
                v >>= 2;
            }
            #[allow(clippy::cast_sign_loss)]
            let nibble = (v & 0xF) as u16;
            word |= nibble << (8 * r);
        }
        word
    }

    fn pop(&mut self, n: usize) -> Bytes {
        let take = n.min(self.tx.len());
        Bytes::from(self.tx.drain(..take).collect::<Vec<u8>>())
    }
}

impl Transport for ChipEmulator {
    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        for &b in data {
            self.push_byte(b);
        }
        Ok(())
    }

    fn receive_up_to(&mut self, n: usize) -> Result<Bytes> {
        self.ensure_open()?;
        Ok(self.pop(n))
    }

    fn receive_exactly(&mut self, n: usize, _timeout: Duration) -> Result<Bytes> {
        self.ensure_open()?;
        Ok(self.pop(n))
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.tx.len())
    }

    fn discard_input(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.tx.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Emulator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utpu_isa::{encode_fetch, encode_load, encode_run, encode_store_immediate, encode_store_word, ProgramBuilder};

    fn int4s(v: &[i32]) -> Vec<Int4> {
        Int4::from_slice(v).unwrap()
    }

    fn matmul(emu: &mut ChipEmulator, w: &[i32], x: &[i32], flags: RunFlags) -> [i8; 2] {
        let mut b = ProgramBuilder::new();
        b.store(0x080, &int4s(w)).unwrap()
            .load_weights(0x080).unwrap()
            .store(0x000, &int4s(x)).unwrap()
            .load_inputs(0x000).unwrap()
            .run(0x100, flags).unwrap()
            .fetch(0x100, false).unwrap()
            .fetch(0x100, true).unwrap()
            .halt();
        emu.send_bytes(b.build().as_bytes()).unwrap();
        let r = emu.receive_exactly(2, Duration::ZERO).unwrap();
        [Int4::from_nibble(r[0]).get(), Int4::from_nibble(r[1]).get()]
    }

    #[test]
    fn reference_cases() {
        let mut emu = ChipEmulator::new();
        assert_eq!(matmul(&mut emu, &[1, 1, 1, 1], &[2, 3], RunFlags::ALL), [5, 5]);
        assert_eq!(matmul(&mut emu, &[1, 2, 3, 4], &[1, 1], RunFlags::ALL), [3, 7]);
        assert_eq!(matmul(&mut emu, &[-2, -2, -2, -2], &[1, 1], RunFlags::ALL), [-1, -1]);
        assert_eq!(matmul(&mut emu, &[5, 6, 7, 7], &[0, 0], RunFlags::ALL), [0, 0]);
        assert_eq!(matmul(&mut emu, &[5, 6, 7, 1], &[1, 2], RunFlags::ALL), [0, 0]);
        assert_eq!(emu.halt_count(), 5);
    }

    #[test]
    fn flags_change_post_processing() {
        let mut emu = ChipEmulator::new();
        // -4 passes the quantizer; without relu it stays -4
        let no_relu = RunFlags::new(true, true, false);
        assert_eq!(matmul(&mut emu, &[-2, -2, -2, -2], &[1, 1], no_relu), [-4, -4]);
        // 17 wraps to its low nibble when not quantized
        let no_quant = RunFlags::new(true, false, true);
        assert_eq!(matmul(&mut emu, &[5, 6, 7, 1], &[1, 2], no_quant), [1, 7 + 2 - 16]);
    }

    #[test]
    fn store_is_parsed_across_split_writes() {
        let mut emu = ChipEmulator::new();
        let bytes = encode_store_word(0x1FF, 0xBEEF).unwrap().to_bytes();
        for b in bytes.iter() {
            emu.send_bytes(&[*b]).unwrap();
        }
        assert_eq!(emu.buffer_word(0x1FF), Some(0xBEEF));
        assert_eq!(emu.instructions_executed(), 1);
    }

    #[test]
    fn fetch_answers_one_byte_per_half() {
        let mut emu = ChipEmulator::new();
        emu.send_bytes(&encode_store_word(0x010, 0x1234).unwrap().to_bytes()).unwrap();
        emu.send_bytes(&encode_fetch(0x010, false).unwrap().to_bytes()).unwrap();
        emu.send_bytes(&encode_fetch(0x010, true).unwrap().to_bytes()).unwrap();
        assert_eq!(emu.bytes_available().unwrap(), 2);
        assert_eq!(emu.receive_up_to(8).unwrap().as_ref(), &[0x34, 0x12]);
    }

    #[test]
    fn load_picks_register_by_target() {
        let mut emu = ChipEmulator::new();
        emu.send_bytes(&encode_store_immediate(0x020, &int4s(&[3, -3, 7, -8])).unwrap().to_bytes()).unwrap();
        emu.send_bytes(&encode_load(0x020, false).unwrap().to_bytes()).unwrap();
        assert_eq!(emu.inputs().map(Int4::get), [3, -3]);
        assert_eq!(emu.weights().map(Int4::get), [0, 0, 0, 0]);
        emu.send_bytes(&encode_load(0x020, true).unwrap().to_bytes()).unwrap();
        assert_eq!(emu.weights().map(Int4::get), [3, -3, 7, -8]);
        emu.send_bytes(&encode_run(0x030, false, false, false).unwrap().to_bytes()).unwrap();
        assert_eq!(emu.buffer_word(0x030), Some(0));
    }

    #[test]
    fn self_test_byte_then_discard() {
        let mut emu = ChipEmulator::with_self_test();
        assert_eq!(emu.bytes_available().unwrap(), 1);
        emu.discard_input().unwrap();
        assert_eq!(emu.bytes_available().unwrap(), 0);
    }

    #[test]
    fn closed_emulator_rejects_io() {
        let mut emu = ChipEmulator::new();
        emu.close().unwrap();
        assert!(matches!(emu.send_bytes(&[0]), Err(UtpuError::Closed)));
        assert!(matches!(emu.bytes_available(), Err(UtpuError::Closed)));
    }
}
