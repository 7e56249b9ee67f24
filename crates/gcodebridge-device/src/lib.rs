//! # GCodeBridge Device
//!
//! The serial side of the proxy: line-framed transports (real and dry-run),
//! USB device discovery, GRBL response classification, and the device
//! session that serialises all traffic onto the single serial channel.

pub mod discovery;
pub mod response;
pub mod session;
pub mod transport;

pub use discovery::find_port_by_usb_id;
pub use response::{status_state, ResponseClass};
pub use session::{Command, DeviceSession, Response, SessionConfig};
pub use transport::{DryRunTransport, LineTransport, SerialTransport};
