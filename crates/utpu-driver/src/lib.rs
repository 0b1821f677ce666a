//! Host driver for the uTPU systolic-array accelerator.
//!
//! Talks to the chip over a byte-oriented serial link that has no flow
//! control and no acknowledgements. Protocol pacing lives in
//! [`LoaderTiming`]; encoding lives in `utpu-isa`.
//!
//! # Backends
//!
//! ```text
//! Hardware:
//!   SerialTransport: /dev/ttyUSB* or /dev/ttyACM*, raw 8N1 via rustix
//!
//! Development / CI:
//!   ChipEmulator:    in-process behavioural model, answers FETCHes
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use utpu_driver::{ProgramLoader, SerialConfig, SerialTransport, BUFFER_SECTION_A,
//!                   BUFFER_SECTION_B, BUFFER_SECTION_C};
//! use utpu_isa::{Int4, RunFlags};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let port = SerialTransport::open("/dev/ttyUSB1", &SerialConfig::default())?;
//! let mut loader = ProgramLoader::new(port);
//! loader.reset_chip()?;
//!
//! let out = loader.execute_2x2_matmul(
//!     &Int4::from_slice(&[1, 2, 3, 4])?,
//!     &Int4::from_slice(&[1, 1])?,
//!     BUFFER_SECTION_B.into(),
//!     BUFFER_SECTION_A.into(),
//!     BUFFER_SECTION_C.into(),
//!     RunFlags::ALL,
//! )?;
//! println!("{} {}", out[0], out[1]);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod backends;
mod error;
mod loader;
mod timing;
mod transport;

pub use backends::{ChipEmulator, SerialConfig, SerialTransport, SELF_TEST_BYTE};
pub use error::{Result, UtpuError};
pub use loader::{
    ProgramLoader, Readback, BUFFER_SECTION_A, BUFFER_SECTION_B, BUFFER_SECTION_C,
    BUFFER_SECTION_D,
};
pub use timing::LoaderTiming;
pub use transport::{open_transport, Transport, TransportSelection, TransportType};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        open_transport, ChipEmulator, LoaderTiming, ProgramLoader, Readback, Result,
        SerialConfig, SerialTransport, Transport, TransportSelection, UtpuError,
    };
}
