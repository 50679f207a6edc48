//! Core traits for the serial transport.
//!
//! `AsyncSerialPortAdapter` lets the real tokio-serial port and the scripted
//! mock be used interchangeably by the transaction engine.

use super::error::PortError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Link speed of the meter's CDC endpoint. The device accepts nothing else.
pub const LINK_BAUD_RATE: u32 = 9600;

/// USB identity used to pick the meter out of the system's serial ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbIdentity {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbIdentity {
    /// Whether the given vendor/product pair belongs to this identity.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

impl std::fmt::Display for UsbIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// The energy meter: vendor 0x1999, product 0x0512.
pub const ENERGY_METER: UsbIdentity = UsbIdentity {
    vid: 0x1999,
    pid: 0x0512,
};

/// Line settings for the meter link. Framing is always 8N1 with no flow
/// control; only the baud rate is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfiguration {
    /// Baud rate (bits per second).
    pub baud_rate: u32,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            baud_rate: LINK_BAUD_RATE,
        }
    }
}

/// Async byte-duplex transport.
///
/// Requires `Send` but not `Sync`: a port is only ever driven by the one
/// transaction that currently owns the session.
#[async_trait]
pub trait AsyncSerialPortAdapter: Send + std::fmt::Debug {
    /// Write bytes to the port. Returns the number of bytes accepted, which
    /// may be fewer than `data.len()`.
    async fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Read whatever bytes are available into `buffer`, waiting until at
    /// least one arrives. `Ok(0)` means end-of-data.
    async fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Get the name/path of this serial port.
    fn name(&self) -> &str;

    /// Get the line settings the port was opened with.
    fn config(&self) -> &PortConfiguration;
}
