//! Byte-stream transport abstraction
//!
//! The program loader needs six things from the link: send, receive up to
//! N, receive exactly N within a deadline, count pending input, discard
//! pending input, and close. Output draining is optional. Everything else
//! about the physical link (baud, framing, OS handles) stays behind this
//! trait.
//!
//! The link has no flow control and no acknowledgements. A transport never
//! retries; a short receive is returned as-is and it is up to the caller to
//! decide what a short answer means.

use crate::error::Result;
use bytes::Bytes;
use std::fmt::Debug;
use std::time::Duration;

/// Byte-stream link to the chip
pub trait Transport: Debug + Send {
    /// Write every byte of `data`, in order
    ///
    /// # Errors
    ///
    /// Returns `TransportWrite` if the link accepts fewer bytes than given.
    fn send_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever is pending, at most `n` bytes, waiting no longer than
    /// the transport's own read timeout
    ///
    /// # Errors
    ///
    /// Returns error if the underlying read fails.
    fn receive_up_to(&mut self, n: usize) -> Result<Bytes>;

    /// Read until `n` bytes have arrived or `timeout` elapses
    ///
    /// The result is short, not an error, when the deadline passes first.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying read fails.
    fn receive_exactly(&mut self, n: usize, timeout: Duration) -> Result<Bytes>;

    /// Bytes received and not yet read
    ///
    /// # Errors
    ///
    /// Returns error if the link cannot be queried.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Drop every byte received and not yet read
    ///
    /// # Errors
    ///
    /// Returns error if the link cannot be flushed.
    fn discard_input(&mut self) -> Result<()>;

    /// Block until every written byte has left the host
    ///
    /// Transports without an output queue return immediately.
    ///
    /// # Errors
    ///
    /// Returns error if the drain fails.
    fn flush_output(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the link; later calls fail with `Closed`
    ///
    /// # Errors
    ///
    /// Returns error if the link cannot be closed cleanly.
    fn close(&mut self) -> Result<()>;

    /// Backend identifier for logs
    fn transport_type(&self) -> TransportType;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        (**self).send_bytes(data)
    }

    fn receive_up_to(&mut self, n: usize) -> Result<Bytes> {
        (**self).receive_up_to(n)
    }

    fn receive_exactly(&mut self, n: usize, timeout: Duration) -> Result<Bytes> {
        (**self).receive_exactly(n, timeout)
    }

    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn flush_output(&mut self) -> Result<()> {
        (**self).flush_output()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn transport_type(&self) -> TransportType {
        (**self).transport_type()
    }
}

/// Transport backend identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// POSIX serial port
    Serial,

    /// In-process behavioural model of the chip
    Emulator,

    /// Anything supplied by the caller (test doubles, bridges)
    Custom,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Emulator => write!(f, "Emulator"),
            Self::Custom => write!(f, "Custom"),
        }
    }
}

/// Transport selection strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSelection {
    /// Open the serial port at this path
    Serial(std::path::PathBuf),

    /// Use the in-process emulator
    Emulator,
}

/// Open the requested transport
///
/// # Errors
///
/// Returns `Connection` if the serial port cannot be opened or configured.
pub fn open_transport(
    selection: &TransportSelection,
    config: &crate::backends::SerialConfig,
) -> Result<Box<dyn Transport>> {
    use crate::backends::{ChipEmulator, SerialTransport};

    match selection {
        TransportSelection::Serial(path) => {
            let port = SerialTransport::open(path, config)?;
            tracing::info!("Using serial transport {}", path.display());
            Ok(Box::new(port))
        }
        TransportSelection::Emulator => {
            tracing::info!("Using chip emulator transport");
            Ok(Box::new(ChipEmulator::new()))
        }
    }
}
