//! Program loader
//!
//! Sequences encoded instructions across a [`Transport`] so that operands
//! land in the unified buffer, the array runs, and results come back as
//! signed 4-bit values.
//!
//! The link has no handshake. Ordering between separately sent programs
//! rests entirely on the waits in [`LoaderTiming`]; see that module for what
//! each one protects.
//!
//! # Example
//!
//! ```
//! use utpu_driver::{ChipEmulator, LoaderTiming, ProgramLoader};
//! use utpu_isa::{Int4, RunFlags};
//!
//! let mut loader = ProgramLoader::with_timing(ChipEmulator::new(), LoaderTiming::immediate());
//! let w = Int4::from_slice(&[1, 2, 3, 4])?;
//! let x = Int4::from_slice(&[1, 1])?;
//! let out = loader.execute_2x2_matmul(&w, &x, 0x080, 0x000, 0x100, RunFlags::ALL)?;
//! assert_eq!(out.map(Int4::get), [3, 7]);
//! # Ok::<(), utpu_driver::UtpuError>(())
//! ```

use crate::error::{Result, UtpuError};
use crate::timing::LoaderTiming;
use crate::transport::Transport;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use utpu_isa::{
    decode_bytes, decode_nibble, encode_store_copy, encode_store_immediate, nibble::LANES_PER_WORD,
    Address, BufferSection, Instruction, Int4, Program, ProgramBuilder, RunFlags,
};

/// Section A base (0x000)
pub const BUFFER_SECTION_A: u16 = BufferSection::A.base().get();
/// Section B base (0x080)
pub const BUFFER_SECTION_B: u16 = BufferSection::B.base().get();
/// Section C base (0x100)
pub const BUFFER_SECTION_C: u16 = BufferSection::C.base().get();
/// Section D base (0x180)
pub const BUFFER_SECTION_D: u16 = BufferSection::D.base().get();

/// Bytes a matmul readback expects: one per output
const MATMUL_RESPONSE_BYTES: usize = 2;

/// Values returned by [`ProgramLoader::read_results`]
///
/// A readback is *complete* when every expected byte arrived before the
/// deadline. An incomplete one still carries whatever did arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readback {
    values: Vec<Int4>,
    /// Values asked for
    pub requested: usize,
    /// Bytes the FETCH burst should have produced
    pub bytes_expected: usize,
    /// Bytes that actually arrived
    pub bytes_received: usize,
    timeout: Duration,
}

impl Readback {
    /// Decoded values, at most `requested` of them
    #[must_use]
    pub fn values(&self) -> &[Int4] {
        &self.values
    }

    /// True when no byte was missing
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.bytes_received >= self.bytes_expected
    }

    /// Values, or `ShortRead` if any byte was missing
    ///
    /// # Errors
    ///
    /// Returns `ShortRead` for an incomplete readback.
    pub fn into_complete(self) -> Result<Vec<Int4>> {
        if self.is_complete() {
            Ok(self.values)
        } else {
            Err(UtpuError::short_read(self.bytes_received, self.bytes_expected, self.timeout))
        }
    }
}

/// Protocol driver bound to one transport
///
/// Every operation takes `&mut self`, so two operations can never
/// interleave their bytes on the link.
#[derive(Debug)]
pub struct ProgramLoader<T: Transport> {
    transport: T,
    timing: LoaderTiming,
}

impl<T: Transport> ProgramLoader<T> {
    /// Loader with default timing
    pub fn new(transport: T) -> Self {
        Self::with_timing(transport, LoaderTiming::default())
    }

    /// Loader with explicit timing
    pub fn with_timing(transport: T, timing: LoaderTiming) -> Self {
        info!("Creating program loader on {} transport", transport.transport_type());
        Self { transport, timing }
    }

    /// Timing in use
    pub const fn timing(&self) -> &LoaderTiming {
        &self.timing
    }

    /// Underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send raw bytes unpaced
    ///
    /// # Errors
    ///
    /// Returns `TransportWrite` if the transport rejects the write.
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.transport.send_bytes(data)?;
        debug!("Sent {} bytes", data.len());
        Ok(())
    }

    /// Send one instruction followed by the instruction gap
    ///
    /// # Errors
    ///
    /// Returns `TransportWrite` if the transport rejects the write.
    pub fn send_instruction(&mut self, insn: &Instruction) -> Result<()> {
        self.transport.send_bytes(&insn.to_bytes())?;
        pause(self.timing.instruction_gap);
        Ok(())
    }

    /// Send a whole program in paced chunks
    ///
    /// # Errors
    ///
    /// Returns `TransportWrite` if any chunk is rejected; later chunks are
    /// not sent.
    pub fn send_program(&mut self, program: &Program) -> Result<()> {
        debug!(
            "Sending program: {} bytes, {} instructions",
            program.len(),
            program.instruction_count()
        );
        for chunk in program.chunks(self.timing.program_chunk) {
            self.transport.send_bytes(chunk)?;
            pause(self.timing.chunk_gap);
        }
        Ok(())
    }

    /// Write `values` into consecutive buffer words starting at `base`
    ///
    /// Values go four to a word, the last word zero-padded; each word is one
    /// STORE sent on its own. Returns the number of STOREs sent.
    ///
    /// # Errors
    ///
    /// Returns `Range` if any word address falls outside the buffer (nothing
    /// is sent in that case), or `TransportWrite` if a send fails.
    pub fn load_array(&mut self, base: i32, values: &[Int4]) -> Result<usize> {
        let base = Address::new(base)?;
        info!("Loading {} int4 values to {}", values.len(), base);

        let stores = values
            .chunks(LANES_PER_WORD)
            .enumerate()
            .map(|(i, group)| {
                let addr = base.offset(i)?;
                encode_store_immediate(i32::from(addr.get()), group)
            })
            .collect::<utpu_isa::Result<Vec<_>>>()?;

        for store in &stores {
            self.send_instruction(store)?;
        }

        if let Some(last) = stores.len().checked_sub(1) {
            debug!("Loaded {} - {}", base, base.offset(last)?);
        }
        Ok(stores.len())
    }

    /// [`load_array`](Self::load_array) for a weight matrix
    ///
    /// # Errors
    ///
    /// See [`load_array`](Self::load_array).
    pub fn load_weights(&mut self, base: i32, weights: &[Int4]) -> Result<usize> {
        debug!("Loading {} weights", weights.len());
        self.load_array(base, weights)
    }

    /// [`load_array`](Self::load_array) for input activations
    ///
    /// # Errors
    ///
    /// See [`load_array`](Self::load_array).
    pub fn load_inputs(&mut self, base: i32, inputs: &[Int4]) -> Result<usize> {
        debug!("Loading {} inputs", inputs.len());
        self.load_array(base, inputs)
    }

    /// Copy one buffer word to another on-chip
    ///
    /// # Errors
    ///
    /// Returns `Range` for an invalid address, `TransportWrite` on send failure.
    pub fn store_copy(&mut self, dest: i32, src: i32) -> Result<()> {
        let insn = encode_store_copy(dest, src)?;
        debug!("{insn}");
        self.send_instruction(&insn)
    }

    /// Read `count` values starting at `base`
    ///
    /// Issues a bottom and a top FETCH per word as one paced burst, waits
    /// the settle time, then reads two bytes per word within the read
    /// timeout. Each byte yields two values, low nibble first.
    ///
    /// # Errors
    ///
    /// Returns `Range` for addresses past the buffer end, `TransportWrite`
    /// on send failure. A late or short answer is not an error here; check
    /// [`Readback::is_complete`].
    pub fn read_results(&mut self, base: i32, count: usize) -> Result<Readback> {
        let base = Address::new(base)?;
        info!("Reading {} values from {}", count, base);

        let num_words = count.div_ceil(LANES_PER_WORD);
        let mut builder = ProgramBuilder::new();
        for i in 0..num_words {
            let addr = i32::from(base.offset(i)?.get());
            builder.fetch(addr, false)?.fetch(addr, true)?;
        }

        self.send_program(&builder.build())?;
        pause(self.timing.read_settle);

        let bytes_expected = num_words * 2;
        let received = self
            .transport
            .receive_exactly(bytes_expected, self.timing.read_timeout)?;
        debug!("Received {} bytes", received.len());

        let mut values = decode_bytes(&received);
        values.truncate(count);

        let readback = Readback {
            values,
            requested: count,
            bytes_expected,
            bytes_received: received.len(),
            timeout: self.timing.read_timeout,
        };
        if !readback.is_complete() {
            warn!(
                "Short readback: {}/{} bytes from {}",
                readback.bytes_received, bytes_expected, base
            );
        }
        Ok(readback)
    }

    /// Run one 2×2 matrix multiply and return both outputs
    ///
    /// Sends STORE/LOAD for weights and inputs, RUN and HALT as one program;
    /// after the compute settle sends FETCH bottom, FETCH top, HALT; then
    /// polls for the two response bytes. Each response byte carries one
    /// output in its low nibble. `flags.compute` is forced on.
    ///
    /// # Errors
    ///
    /// Returns `Range` for invalid addresses or more than four weights or
    /// inputs, `TransportWrite` on send failure, or `ShortRead` if fewer
    /// than two bytes arrive before the result deadline.
    pub fn execute_2x2_matmul(
        &mut self,
        weights: &[Int4],
        inputs: &[Int4],
        weight_addr: i32,
        input_addr: i32,
        result_addr: i32,
        flags: RunFlags,
    ) -> Result<[Int4; 2]> {
        info!("Executing 2x2 matmul (quantize={}, relu={})", flags.quantize, flags.relu);

        let flags = RunFlags { compute: true, ..flags };
        let mut compute = ProgramBuilder::new();
        compute
            .store(weight_addr, weights)?
            .load_weights(weight_addr)?
            .store(input_addr, inputs)?
            .load_inputs(input_addr)?
            .run(result_addr, flags)?
            .halt();

        let mut fetch = ProgramBuilder::new();
        fetch.fetch(result_addr, false)?.fetch(result_addr, true)?.halt();

        self.transport.discard_input()?;
        self.send_program(&compute.build())?;

        pause(self.timing.compute_settle);

        self.transport.discard_input()?;
        self.send_program(&fetch.build())?;

        let deadline = Instant::now() + self.timing.result_deadline;
        while self.transport.bytes_available()? < MATMUL_RESPONSE_BYTES && Instant::now() < deadline {
            pause(self.timing.poll_interval);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let budget = if remaining.is_zero() {
            self.timing.min_read_budget
        } else {
            remaining
        };
        let received = self.transport.receive_exactly(MATMUL_RESPONSE_BYTES, budget)?;

        if received.len() < MATMUL_RESPONSE_BYTES {
            warn!("Matmul result short: {}/{} bytes", received.len(), MATMUL_RESPONSE_BYTES);
            return Err(UtpuError::short_read(
                received.len(),
                MATMUL_RESPONSE_BYTES,
                self.timing.result_deadline,
            ));
        }

        let out = [decode_nibble(received[0]), decode_nibble(received[1])];
        debug!("Matmul result: [{}, {}]", out[0], out[1]);
        Ok(out)
    }

    /// Flush host-side receive buffers
    ///
    /// This does **not** reset the chip. After a HALT the chip ignores
    /// further bytes until its hardware reset line is pulsed; no byte is
    /// sent here. Discards input, waits, discards again.
    ///
    /// # Errors
    ///
    /// Returns error if the transport cannot be flushed.
    pub fn reset_chip(&mut self) -> Result<()> {
        warn!("reset_chip only flushes host buffers; pulse the FPGA reset line to reset the chip");
        self.transport.discard_input()?;
        pause(self.timing.reset_settle);
        self.transport.discard_input()?;
        debug!("Host-side flush complete");
        Ok(())
    }

    /// Close the transport
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails to close.
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }
}

fn pause(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}
