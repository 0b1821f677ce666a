//! Protocol timing margins
//!
//! The link has no handshake, so the loader separates commands with fixed
//! waits sized for the chip's UART front end at its reference clock. Each
//! wait is a margin, not a guarantee: re-validate them whenever the FPGA
//! clock, baud rate or FIFO depth changes.
//!
//! | Field | Default | Guards |
//! |-------|---------|--------|
//! | `instruction_gap` | 1 ms | decoder finishing one STORE before the next |
//! | `program_chunk` | 128 B | half the 256-byte receive FIFO |
//! | `chunk_gap` | 15 ms | FIFO draining between program chunks |
//! | `read_settle` | 100 ms | FETCH burst reaching the chip before reading |
//! | `read_timeout` | 200 ms | readback deadline |
//! | `compute_settle` | 10 ms | RUN completing before the FETCHes land |
//! | `result_deadline` | 500 ms | matmul result wait |
//! | `poll_interval` | 2 ms | bytes-available polling period |
//! | `min_read_budget` | 100 ms | final read once the deadline is spent |
//! | `reset_settle` | 50 ms | stragglers arriving between two flushes |

use std::time::Duration;

/// Loader timing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderTiming {
    /// Pause after each individually sent instruction
    pub instruction_gap: Duration,

    /// Bytes per paced program chunk
    pub program_chunk: usize,

    /// Pause after each program chunk
    pub chunk_gap: Duration,

    /// Wait between sending a FETCH burst and reading
    pub read_settle: Duration,

    /// Deadline for a readback
    pub read_timeout: Duration,

    /// Wait between the compute program and its FETCH program
    pub compute_settle: Duration,

    /// Total wait for matmul result bytes
    pub result_deadline: Duration,

    /// Bytes-available polling period
    pub poll_interval: Duration,

    /// Read budget used when the result deadline is already spent
    pub min_read_budget: Duration,

    /// Wait between the two flushes of `reset_chip`
    pub reset_settle: Duration,
}

impl Default for LoaderTiming {
    fn default() -> Self {
        Self {
            instruction_gap: Duration::from_millis(1),
            program_chunk: 128,
            chunk_gap: Duration::from_millis(15),
            read_settle: Duration::from_millis(100),
            read_timeout: Duration::from_millis(200),
            compute_settle: Duration::from_millis(10),
            result_deadline: Duration::from_millis(500),
            poll_interval: Duration::from_millis(2),
            min_read_budget: Duration::from_millis(100),
            reset_settle: Duration::from_millis(50),
        }
    }
}

impl LoaderTiming {
    /// No waits at all, for transports that answer synchronously
    ///
    /// Deadlines stay non-zero so a slow test double still gets one read.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            instruction_gap: Duration::ZERO,
            chunk_gap: Duration::ZERO,
            read_settle: Duration::ZERO,
            compute_settle: Duration::ZERO,
            poll_interval: Duration::ZERO,
            reset_settle: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the per-instruction gap
    #[must_use]
    pub const fn with_instruction_gap(mut self, gap: Duration) -> Self {
        self.instruction_gap = gap;
        self
    }

    /// Set program chunk size and the pause after each chunk
    #[must_use]
    pub fn with_chunking(mut self, chunk: usize, gap: Duration) -> Self {
        self.program_chunk = chunk.max(1);
        self.chunk_gap = gap;
        self
    }

    /// Set the readback settle and deadline
    #[must_use]
    pub const fn with_read(mut self, settle: Duration, timeout: Duration) -> Self {
        self.read_settle = settle;
        self.read_timeout = timeout;
        self
    }

    /// Set the matmul result deadline
    #[must_use]
    pub const fn with_result_deadline(mut self, deadline: Duration) -> Self {
        self.result_deadline = deadline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_link_protocol() {
        let t = LoaderTiming::default();
        assert_eq!(t.program_chunk, 128);
        assert_eq!(t.chunk_gap, Duration::from_millis(15));
        assert_eq!(t.read_timeout, Duration::from_millis(200));
        assert_eq!(t.result_deadline, Duration::from_millis(500));
    }

    #[test]
    fn immediate_keeps_deadlines() {
        let t = LoaderTiming::immediate();
        assert!(t.read_settle.is_zero());
        assert!(t.chunk_gap.is_zero());
        assert_eq!(t.read_timeout, LoaderTiming::default().read_timeout);
        assert_eq!(t.program_chunk, 128);
    }

    #[test]
    fn chunk_size_never_zero() {
        let t = LoaderTiming::default().with_chunking(0, Duration::ZERO);
        assert_eq!(t.program_chunk, 1);
    }
}
