//! Shared test utilities for the meter client tests.
//!
//! This module provides:
//! - Builders for device response frames
//! - A scripted meter wired into a `MeterService`

#![allow(dead_code)]

use energymeter_link::{MeterService, MockConnector, MockSerialPort};

/// The `$LOAD-INFO` answer used by most tests: id 1, 100 sectors of 512
/// bytes with 40 free, clock at 2023-06-01 12:30:00.
pub const INFO: &[u8] = b"1 100 40 512 23-06-01-12-30-00$OK";

pub const OK: &[u8] = b"$OK";

/// Build a `$LOAD-INFO` answer.
pub fn info_frame(id: u16, total: u32, free: u32, sector: u32, rtc: &str) -> Vec<u8> {
    format!("{id} {total} {free} {sector} {rtc}$OK").into_bytes()
}

/// Build a `$LOAD-LIST` answer.
pub fn list_frame(files: &[(&str, u32)]) -> Vec<u8> {
    let mut out = String::new();
    for (name, size) in files {
        out.push_str(&format!("$FILE-ENTRY {size} {name}"));
    }
    out.push_str("$OK");
    out.into_bytes()
}

/// The answer a meter without files gives to `$LOAD-LIST`.
pub fn empty_list_frame() -> Vec<u8> {
    b"$FILE-ENTRY 0 none$OK".to_vec()
}

/// Build a `$LOAD-ALL` answer.
pub fn bulk_frame(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, content) in files {
        out.extend_from_slice(format!("$FILE-ENTRY {} {} ", content.len(), name).as_bytes());
        out.extend_from_slice(content);
    }
    out.extend_from_slice(b"$OK");
    out
}

/// Build a `$LOAD-ONE` answer.
pub fn single_frame(content: &[u8]) -> Vec<u8> {
    let mut out = format!("$FILE-START {} ", content.len()).into_bytes();
    out.extend_from_slice(content);
    out.extend_from_slice(b"$FILE-END");
    out
}

/// A mock meter that already has the connect-time refresh (info + list)
/// scripted.
pub fn scripted_meter(name: &str, files: &[(&str, u32)]) -> MockSerialPort {
    let mut port = MockSerialPort::new(name);
    port.reply(INFO).reply(&list_frame(files));
    port
}

/// A service whose connector hands out `port` once.
///
/// Returns the connector too, for inspecting or queueing further ports.
pub fn service_with(port: &MockSerialPort) -> (MeterService, MockConnector) {
    let connector = MockConnector::with_port(port.clone());
    (MeterService::new(connector.clone()), connector)
}
