//! Dry-run transport
//!
//! Satisfies the [`LineTransport`] contract without hardware: writes are
//! recorded and discarded, and each write synthesises the response a
//! well-behaved GRBL device would produce (`ok` for commands, a canned
//! status frame for `?`). Synthesis can be paused to exercise the timeout
//! path in tests.

use crate::transport::LineTransport;
use gcodebridge_core::TransportError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Status frame synthesised for `?` writes
pub const DRY_RUN_STATUS: &str = "<Idle|MPos:0.000,0.000,0.000|FS:0,0>";

#[derive(Default)]
struct Inner {
    responses: VecDeque<String>,
    writes: Vec<String>,
    closed: bool,
}

/// Synthetic transport for running the proxy without a device
#[derive(Default)]
pub struct DryRunTransport {
    inner: Mutex<Inner>,
    available: Condvar,
    synthesize: AtomicBool,
}

impl DryRunTransport {
    /// Create a transport that answers every write
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: Condvar::new(),
            synthesize: AtomicBool::new(true),
        }
    }

    /// Create a transport that withholds all responses
    pub fn unresponsive() -> Self {
        let transport = Self::new();
        transport.synthesize.store(false, Ordering::SeqCst);
        transport
    }

    /// Enable or disable response synthesis
    pub fn set_responding(&self, responding: bool) {
        self.synthesize.store(responding, Ordering::SeqCst);
    }

    /// Everything written so far, in order
    pub fn writes(&self) -> Vec<String> {
        self.inner.lock().writes.clone()
    }

    /// Push an arbitrary line for the next `read_line`
    ///
    /// Lets tests emit unsolicited frames (alarms, banners) the synthetic
    /// device would not produce on its own.
    pub fn inject_line(&self, line: &str) {
        let mut inner = self.inner.lock();
        inner.responses.push_back(line.to_string());
        self.available.notify_one();
    }
}

impl LineTransport for DryRunTransport {
    fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }

        debug!("[dry-run] would send: {}", line);
        inner.writes.push(line.to_string());

        if self.synthesize.load(Ordering::SeqCst) {
            let response = if line.trim() == "?" {
                DRY_RUN_STATUS
            } else {
                "ok"
            };
            inner.responses.push_back(response.to_string());
            self.available.notify_one();
        }

        Ok(())
    }

    fn read_line(&self) -> Result<String, TransportError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(line) = inner.responses.pop_front() {
                return Ok(line);
            }
            if inner.closed {
                return Err(TransportError::Closed);
            }
            self.available.wait(&mut inner);
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.closed = true;
            debug!("[dry-run] transport closed");
        }
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_commands_get_ok() {
        let transport = DryRunTransport::new();
        transport.write_line("G28").unwrap();
        assert_eq!(transport.read_line().unwrap(), "ok");
        assert_eq!(transport.writes(), vec!["G28"]);
    }

    #[test]
    fn test_status_query_gets_status_frame() {
        let transport = DryRunTransport::new();
        transport.write_line("?").unwrap();
        assert_eq!(transport.read_line().unwrap(), DRY_RUN_STATUS);
    }

    #[test]
    fn test_unresponsive_transport_stays_silent() {
        let transport = DryRunTransport::unresponsive();
        transport.write_line("G28").unwrap();
        assert!(transport.inner.lock().responses.is_empty());
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let transport = Arc::new(DryRunTransport::new());
        let reader = {
            let transport = transport.clone();
            std::thread::spawn(move || transport.read_line())
        };
        // Give the reader a moment to block on the condvar.
        std::thread::sleep(std::time::Duration::from_millis(50));
        transport.close();
        let result = reader.join().unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn test_write_after_close_fails() {
        let transport = DryRunTransport::new();
        transport.close();
        assert!(transport.write_line("G28").is_err());
    }
}
