//! Transport backend implementations
//!
//! Two backends available:
//! - **Serial**: POSIX tty to the FPGA (raw 8N1, no flow control)
//! - **Emulator**: In-process model of the chip, no hardware needed

pub mod emulator;
pub mod serial;

pub use emulator::{ChipEmulator, SELF_TEST_BYTE};
pub use serial::{SerialConfig, SerialTransport};
