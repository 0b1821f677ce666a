//! POSIX serial-port transport
//!
//! Opens a tty (`/dev/ttyUSB*`, `/dev/ttyACM*`) in raw 8N1 mode with every
//! form of flow control disabled, which is what the chip's UART expects.
//! All syscalls go through `rustix`; no `libc`, no `unsafe`.
//!
//! Writes are split into half-FIFO chunks with a short gap after each,
//! because the chip's receive FIFO is shallow and the link has no
//! handshake to tell the host when it is full.

use crate::error::{Result, UtpuError};
use crate::transport::{Transport, TransportType};
use bytes::{Bytes, BytesMut};
use rustix::event::{poll, PollFd, PollFlags};
use rustix::fs::OFlags;
use rustix::io::Errno;
use rustix::termios::{self, ControlModes, InputModes, OptionalActions, QueueSelector, SpecialCodeIndex};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Serial link configuration
///
/// Defaults match the chip's UART: 115200 baud, 1 s read and write
/// timeouts, 256-byte receive FIFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Line rate in baud
    pub baud: u32,

    /// Longest wait for input in `receive_up_to`
    pub read_timeout: Duration,

    /// Longest wait for the OS to accept output
    pub write_timeout: Duration,

    /// Chip receive FIFO depth in bytes; writes go out in halves of this
    pub fifo_size: usize,

    /// Pause after each write chunk
    pub chunk_gap: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: 115_200,
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            fifo_size: 256,
            chunk_gap: Duration::from_millis(10),
        }
    }
}

impl SerialConfig {
    /// Set the line rate
    #[must_use]
    pub const fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Set the read timeout
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout
    #[must_use]
    pub const fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Bytes per write chunk (half the FIFO, never zero)
    #[must_use]
    pub fn write_chunk(&self) -> usize {
        (self.fifo_size / 2).max(1)
    }
}

/// Serial-port transport
#[derive(Debug)]
pub struct SerialTransport {
    path: PathBuf,
    file: Option<File>,
    config: SerialConfig,
}

impl SerialTransport {
    /// Open and configure a serial port
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the port does not exist, is busy, or rejects
    /// the line settings.
    pub fn open(path: impl AsRef<Path>, config: &SerialConfig) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening serial port {}", path.display());

        if !path.exists() {
            return Err(UtpuError::connection(path, "no such port (is the FPGA connected?)"));
        }

        #[allow(clippy::cast_possible_wrap)]
        let flags = (OFlags::NOCTTY | OFlags::NONBLOCK).bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(flags)
            .open(path)
            .map_err(|e| UtpuError::connection(path, format!("{e} (port in use or no permission?)")))?;

        configure_raw_8n1(&file, config.baud)
            .map_err(|e| UtpuError::connection(path, format!("line setup failed: {e}")))?;

        info!("UART connected: {} @ {} baud", path.display(), config.baud);

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            config: config.clone(),
        })
    }

    /// Port path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(UtpuError::Closed)
    }

    /// Wait until the port is ready for `flags` or `timeout` passes.
    fn wait_ready(file: &File, flags: PollFlags, timeout: Duration) -> Result<bool> {
        let mut fds = [PollFd::new(file, flags)];
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        match poll(&mut fds, ms) {
            Ok(n) => Ok(n > 0),
            Err(Errno::INTR) => Ok(false),
            Err(e) => Err(std::io::Error::from(e).into()),
        }
    }

    /// Write one chunk completely or fail at the write deadline.
    fn write_chunk(&self, chunk: &[u8], total_written: usize, total: usize) -> Result<()> {
        let file = self.file()?;
        let deadline = Instant::now() + self.config.write_timeout;
        let mut done = 0;

        while done < chunk.len() {
            match rustix::io::write(file, &chunk[done..]) {
                Ok(n) => done += n,
                Err(Errno::AGAIN | Errno::INTR) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() || !Self::wait_ready(file, PollFlags::OUT, remaining)? {
                        return Err(UtpuError::short_write(total_written + done, total));
                    }
                }
                Err(e) => {
                    return Err(UtpuError::write_failed(total_written + done, total, e.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Read what is pending into `buf` without blocking.
    fn read_pending(file: &File, buf: &mut [u8]) -> Result<usize> {
        match rustix::io::read(file, buf) {
            Ok(n) => Ok(n),
            Err(Errno::AGAIN | Errno::INTR) => Ok(0),
            Err(e) => Err(std::io::Error::from(e).into()),
        }
    }
}

impl Transport for SerialTransport {
    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        let chunk_size = self.config.write_chunk();
        let mut written = 0;
        for chunk in data.chunks(chunk_size) {
            self.write_chunk(chunk, written, data.len())?;
            written += chunk.len();
            debug!("Wrote {} bytes ({}/{})", chunk.len(), written, data.len());
            std::thread::sleep(self.config.chunk_gap);
        }
        Ok(())
    }

    fn receive_up_to(&mut self, n: usize) -> Result<Bytes> {
        let file = self.file()?;
        if n == 0 || !Self::wait_ready(file, PollFlags::IN, self.config.read_timeout)? {
            return Ok(Bytes::new());
        }
        let mut buf = vec![0u8; n];
        let got = Self::read_pending(file, &mut buf)?;
        buf.truncate(got);
        Ok(Bytes::from(buf))
    }

    fn receive_exactly(&mut self, n: usize, timeout: Duration) -> Result<Bytes> {
        let file = self.file()?;
        let deadline = Instant::now() + timeout;
        let mut out = BytesMut::with_capacity(n);
        let mut buf = vec![0u8; n];

        while out.len() < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if !Self::wait_ready(file, PollFlags::IN, remaining)? {
                continue;
            }
            let want = n - out.len();
            let got = Self::read_pending(file, &mut buf[..want])?;
            out.extend_from_slice(&buf[..got]);
        }

        if out.len() < n {
            warn!("Only received {}/{} bytes (timeout?)", out.len(), n);
        }
        Ok(out.freeze())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let pending = rustix::io::ioctl_fionread(self.file()?).map_err(std::io::Error::from)?;
        Ok(usize::try_from(pending).unwrap_or(usize::MAX))
    }

    fn discard_input(&mut self) -> Result<()> {
        termios::tcflush(self.file()?, QueueSelector::IFlush).map_err(std::io::Error::from)?;
        Ok(())
    }

    fn flush_output(&mut self) -> Result<()> {
        termios::tcdrain(self.file()?).map_err(std::io::Error::from)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            info!("UART closed: {}", self.path.display());
        }
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.file.is_some() {
            debug!("Dropping open serial port {}", self.path.display());
        }
    }
}

/// Raw mode, 8 data bits, no parity, one stop bit, no XON/XOFF, no RTS/CTS,
/// non-canonical reads that return immediately.
fn configure_raw_8n1(file: &File, baud: u32) -> rustix::io::Result<()> {
    let mut tio = termios::tcgetattr(file)?;
    tio.make_raw();
    tio.set_speed(baud)?;

    tio.control_modes -= ControlModes::PARENB | ControlModes::CSTOPB | ControlModes::CSIZE;
    tio.control_modes -= ControlModes::CRTSCTS;
    tio.control_modes |= ControlModes::CS8 | ControlModes::CREAD | ControlModes::CLOCAL;
    tio.input_modes -= InputModes::IXON | InputModes::IXOFF | InputModes::IXANY;

    tio.special_codes[SpecialCodeIndex::VMIN] = 0;
    tio.special_codes[SpecialCodeIndex::VTIME] = 0;

    termios::tcsetattr(file, OptionalActions::Now, &tio)?;
    termios::tcflush(file, QueueSelector::IOFlush)
}
