//! Serial device discovery
//!
//! Resolves a USB `vendor:product` pair into a device node by enumerating
//! the system's serial ports.

use gcodebridge_core::TransportError;
use tracing::debug;

/// Parse a `vendor:product` hex pair.
fn parse_usb_id(usb_id: &str) -> Result<(u16, u16), TransportError> {
    let invalid = || TransportError::InvalidUsbId {
        usb_id: usb_id.to_string(),
    };

    let (vendor, product) = usb_id.split_once(':').ok_or_else(invalid)?;
    let vid = u16::from_str_radix(vendor.trim(), 16).map_err(|_| invalid())?;
    let pid = u16::from_str_radix(product.trim(), 16).map_err(|_| invalid())?;
    Ok((vid, pid))
}

/// Find the serial port path for a given USB device ID.
///
/// Returns the device node (e.g. `/dev/ttyACM0` or `COM3`). The error for a
/// missing device lists the USB serial devices that were present, for
/// operator diagnostics.
pub fn find_port_by_usb_id(usb_id: &str) -> Result<String, TransportError> {
    let (vid, pid) = parse_usb_id(usb_id)?;

    let ports = serialport::available_ports().map_err(|e| TransportError::OpenFailed {
        port: usb_id.to_string(),
        reason: format!("failed to enumerate ports: {}", e),
    })?;

    let mut available = Vec::new();
    for port in &ports {
        if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
            if usb.vid == vid && usb.pid == pid {
                debug!("Found device {} at {}", usb_id, port.port_name);
                return Ok(port.port_name.clone());
            }
            available.push(format!(
                "{} (VID:PID={:04x}:{:04x})",
                port.port_name, usb.vid, usb.pid
            ));
        }
    }

    Err(TransportError::DeviceNotFound {
        usb_id: usb_id.to_string(),
        available: if available.is_empty() {
            "none".to_string()
        } else {
            available.join(", ")
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_usb_id() {
        assert_eq!(parse_usb_id("303a:4001").unwrap(), (0x303a, 0x4001));
        assert_eq!(parse_usb_id("1A86:7523").unwrap(), (0x1a86, 0x7523));
    }

    #[test]
    fn test_parse_invalid_usb_id() {
        assert!(parse_usb_id("303a").is_err());
        assert!(parse_usb_id("zz:4001").is_err());
        assert!(parse_usb_id("303a:").is_err());
        assert!(parse_usb_id("").is_err());
    }
}
