//! Serial port transport
//!
//! Line-framed I/O over a real serial port (8-N-1, configurable baud).
//! Opening applies a quiescence delay and discards whatever the device's
//! bootloader emitted in that window. Reads poll with a short timeout so a
//! close is observed promptly.

use crate::transport::LineTransport;
use gcodebridge_core::TransportError;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll timeout for blocking reads; bounds close latency
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Read chunk size
const READ_CHUNK: usize = 256;

/// Serial line transport
pub struct SerialTransport {
    reader: Mutex<ReadState>,
    writer: Mutex<Box<dyn serialport::SerialPort>>,
    closed: AtomicBool,
    path: String,
}

struct ReadState {
    port: Box<dyn serialport::SerialPort>,
    partial: String,
    pending: std::collections::VecDeque<String>,
}

impl SerialTransport {
    /// Open the serial port and wait out the quiescence window
    ///
    /// Bytes received during `quiescence` are discarded; GRBL bootloaders
    /// tend to emit garbage right after the port opens.
    pub fn open(path: &str, baud_rate: u32, quiescence: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .timeout(READ_POLL_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                warn!("Failed to open serial port {}: {}", path, e);
                TransportError::OpenFailed {
                    port: path.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let writer = port.try_clone().map_err(|e| TransportError::OpenFailed {
            port: path.to_string(),
            reason: format!("failed to clone port handle: {}", e),
        })?;

        if !quiescence.is_zero() {
            std::thread::sleep(quiescence);
        }
        if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
            warn!("Failed to flush startup bytes from {}: {}", path, e);
        }

        info!("Connected to {} at {} baud", path, baud_rate);

        Ok(Self {
            reader: Mutex::new(ReadState {
                port,
                partial: String::new(),
                pending: std::collections::VecDeque::new(),
            }),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            path: path.to_string(),
        })
    }

    /// The device node this transport is attached to
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl LineTransport for SerialTransport {
    fn write_line(&self, line: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn read_line(&self) -> Result<String, TransportError> {
        let mut buf = [0u8; READ_CHUNK];

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }

            let mut state = self.reader.lock();
            if let Some(line) = state.pending.pop_front() {
                return Ok(line);
            }

            match state.port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    state.partial.push_str(&chunk);
                    while let Some(pos) = state.partial.find('\n') {
                        let mut line: String = state.partial.drain(..=pos).collect();
                        line.truncate(line.trim_end_matches(['\r', '\n']).len());
                        state.pending.push_back(line);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    debug!("Serial read error on {}: {}", self.path, e);
                    self.closed.store(true, Ordering::SeqCst);
                    return Err(TransportError::Io(e));
                }
            }
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Disconnected from {}", self.path);
        }
    }
}
