//! Error types for uTPU driver operations

use std::path::PathBuf;
use thiserror::Error;
use utpu_isa::IsaError;

/// Result type alias for uTPU operations
pub type Result<T> = std::result::Result<T, UtpuError>;

/// Errors that can occur while talking to the chip
#[derive(Debug, Error)]
pub enum UtpuError {
    /// Address, value or lane-count rejected by the encoder
    #[error("Range error: {source}")]
    Range {
        /// Encoder error
        #[from]
        source: IsaError,
    },

    /// Serial port could not be opened or configured
    #[error("Could not open {path}: {reason}")]
    Connection {
        /// Port that was attempted
        path: PathBuf,
        /// Reason for failure
        reason: String,
    },

    /// Transport accepted fewer bytes than requested, or the write failed
    #[error("Write failed: wrote {written}/{expected} bytes{}", detail_suffix(.reason))]
    TransportWrite {
        /// Bytes accepted before the failure
        written: usize,
        /// Bytes requested
        expected: usize,
        /// Underlying cause, if any
        reason: Option<String>,
    },

    /// Fewer response bytes than expected arrived before the deadline
    #[error("Short read: received {received}/{expected} bytes within {timeout_ms}ms")]
    ShortRead {
        /// Bytes received
        received: usize,
        /// Bytes expected
        expected: usize,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Transport used after `close`
    #[error("Transport closed")]
    Closed,

    /// I/O error during link communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

fn detail_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(" ({r})")).unwrap_or_default()
}

impl UtpuError {
    /// Create a connection error
    pub fn connection(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Connection {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a short-write error
    pub const fn short_write(written: usize, expected: usize) -> Self {
        Self::TransportWrite {
            written,
            expected,
            reason: None,
        }
    }

    /// Create a failed-write error with a cause
    pub fn write_failed(written: usize, expected: usize, reason: impl Into<String>) -> Self {
        Self::TransportWrite {
            written,
            expected,
            reason: Some(reason.into()),
        }
    }

    /// Create a short-read error
    #[allow(clippy::cast_possible_truncation)]
    pub fn short_read(received: usize, expected: usize, timeout: std::time::Duration) -> Self {
        Self::ShortRead {
            received,
            expected,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// True for encoder range failures
    pub const fn is_range(&self) -> bool {
        matches!(self, Self::Range { .. })
    }

    /// True when the chip did not answer in time
    pub const fn is_short_read(&self) -> bool {
        matches!(self, Self::ShortRead { .. })
    }
}
