//! Line-framed transports
//!
//! The device session talks to hardware through the [`LineTransport`]
//! trait: blocking line reads, blocking line writes, and an idempotent
//! close. The serial implementation drives a real port; the dry-run
//! implementation synthesises responses so the whole pipeline can run
//! without hardware.

pub mod dry_run;
pub mod serial;

pub use dry_run::DryRunTransport;
pub use serial::SerialTransport;

use gcodebridge_core::TransportError;

/// Byte transport framed into UTF-8 lines
///
/// Lines are `\n`-terminated on the wire; `write_line` appends the
/// terminator, `read_line` strips `\r?\n`. `read_line` blocks until a
/// complete line is available and fails with [`TransportError::Closed`]
/// once the transport has been closed.
pub trait LineTransport: Send + Sync {
    /// Write one line, appending the `\n` terminator
    fn write_line(&self, line: &str) -> Result<(), TransportError>;

    /// Block until one complete line has been read
    fn read_line(&self) -> Result<String, TransportError>;

    /// Close the transport; wakes any blocked reader
    fn close(&self);
}
