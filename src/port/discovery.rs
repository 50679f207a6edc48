//! USB port discovery.
//!
//! Enumerates the system's serial ports and picks out the meter by its
//! vendor/product identity. Enumeration is blocking; async callers should go
//! through `spawn_blocking`.

use super::error::PortError;
use super::traits::UsbIdentity;
use serialport::{available_ports, SerialPortInfo, SerialPortType};
use tracing::debug;

/// Find the first serial port whose USB identity matches.
pub fn find_device(identity: UsbIdentity) -> Result<Option<String>, PortError> {
    let ports = available_ports()?;
    Ok(select_port(&ports, identity))
}

/// Whether the port is still present. With an identity, the port must also
/// still report that identity.
pub fn is_present(port_name: &str, identity: Option<UsbIdentity>) -> bool {
    match available_ports() {
        Ok(ports) => port_listed(&ports, port_name, identity),
        // enumeration hiccups are not treated as a disconnect
        Err(e) => {
            debug!("Port enumeration failed during presence check: {}", e);
            true
        }
    }
}

fn select_port(ports: &[SerialPortInfo], identity: UsbIdentity) -> Option<String> {
    ports
        .iter()
        .find(|port| match &port.port_type {
            SerialPortType::UsbPort(usb) => identity.matches(usb.vid, usb.pid),
            _ => false,
        })
        .map(|port| port.port_name.clone())
}

fn port_listed(ports: &[SerialPortInfo], port_name: &str, identity: Option<UsbIdentity>) -> bool {
    ports.iter().any(|port| {
        port.port_name == port_name
            && match (&port.port_type, identity) {
                (_, None) => true,
                (SerialPortType::UsbPort(usb), Some(id)) => id.matches(usb.vid, usb.pid),
                (_, Some(_)) => false,
            }
    })
}
