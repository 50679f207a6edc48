use serde::Serialize;
use std::time::Duration;

/// A completed transaction's response, including its terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Everything received, byte for byte.
    pub bytes: Vec<u8>,
    /// `bytes` decoded for text parsers. Non-ASCII bytes become U+FFFD.
    pub text: String,
    pub elapsed: Duration,
}

impl Response {
    pub fn new(bytes: Vec<u8>, elapsed: Duration) -> Self {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Self {
            bytes,
            text,
            elapsed,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes received per second of wall-clock time since the query was sent.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes.len() as f64 / secs
    }

    pub fn kilobytes_per_second(&self) -> f64 {
        self.bytes_per_second() / 1000.0
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            bytes: self.bytes.len() as u64,
            elapsed_ms: self.elapsed.as_millis() as u64,
            bytes_per_second: self.bytes_per_second(),
        }
    }
}

/// Size and speed of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransferStats {
    pub bytes: u64,
    pub elapsed_ms: u64,
    pub bytes_per_second: f64,
}
