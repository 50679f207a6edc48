//! Mock serial port implementation for testing.
//!
//! `MockSerialPort` plays the device side of the protocol from a script: every
//! write consumes the next scripted reply and makes its chunks readable. Reads
//! block until data arrives, so a missing reply exercises the timeout path.

use super::error::PortError;
use super::traits::{AsyncSerialPortAdapter, PortConfiguration};
use crate::session::LinkSignal;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// What the mock device does after receiving a query.
#[derive(Debug, Clone)]
enum Reply {
    /// Emit these chunks, each delivered by a separate read.
    Chunks(Vec<Vec<u8>>),
    /// Say nothing.
    Silence,
    /// Emit these chunks, then drop off the bus.
    ChunksThenDisconnect(Vec<Vec<u8>>),
}

#[derive(Debug, Default)]
struct MockPortState {
    /// Replies for upcoming writes, in order.
    replies: VecDeque<Reply>,
    /// Chunks waiting to be read.
    pending: VecDeque<Vec<u8>>,
    /// Log of all bytes written to the port.
    write_log: Vec<Vec<u8>>,
    /// Reject writes with an I/O error.
    fail_writes: bool,
    /// Set once the device has gone away; reads drain `pending` first.
    disconnected: bool,
    /// Link signal of the session wrapping this port.
    link: Option<LinkSignal>,
}

/// Scripted stand-in for the meter.
///
/// # Example
/// ```
/// use energymeter_link::port::{AsyncSerialPortAdapter, MockSerialPort};
///
/// # tokio_test::block_on(async {
/// let mut port = MockSerialPort::new("MOCK0");
/// port.reply(b"$OK");
///
/// port.write_bytes(b"$DELETE-ALL").await.unwrap();
/// let mut buffer = [0u8; 8];
/// let n = port.read_bytes(&mut buffer).await.unwrap();
/// assert_eq!(&buffer[..n], b"$OK");
/// assert_eq!(port.written_queries(), vec!["$DELETE-ALL".to_string()]);
/// # });
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    name: String,
    config: PortConfiguration,
    state: Arc<Mutex<MockPortState>>,
    readable: Arc<Notify>,
}

impl MockSerialPort {
    /// Create a new mock serial port with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: PortConfiguration::default(),
            state: Arc::new(Mutex::new(MockPortState::default())),
            readable: Arc::new(Notify::new()),
        }
    }

    /// Answer the next query with `data` in a single chunk.
    pub fn reply(&mut self, data: &[u8]) -> &mut Self {
        self.push_reply(Reply::Chunks(vec![data.to_vec()]))
    }

    /// Answer the next query with `data` split into chunks of `chunk_size`.
    pub fn reply_in_chunks(&mut self, data: &[u8], chunk_size: usize) -> &mut Self {
        let chunks = data.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect();
        self.push_reply(Reply::Chunks(chunks))
    }

    /// Ignore the next query entirely.
    pub fn reply_silence(&mut self) -> &mut Self {
        self.push_reply(Reply::Silence)
    }

    /// Answer the next query with `partial`, then disconnect.
    pub fn reply_then_disconnect(&mut self, partial: &[u8]) -> &mut Self {
        let chunks = if partial.is_empty() {
            Vec::new()
        } else {
            vec![partial.to_vec()]
        };
        self.push_reply(Reply::ChunksThenDisconnect(chunks))
    }

    /// Make every subsequent write fail.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Simulate the device being unplugged.
    pub fn disconnect(&self) {
        let link = {
            let mut state = self.state.lock();
            state.disconnected = true;
            state.link.clone()
        };
        if let Some(link) = link {
            link.disconnect();
        }
        self.readable.notify_one();
    }

    /// Wire this port to the link signal of the session that owns it, so
    /// `disconnect` is observed the way a transport disconnect event would be.
    pub fn attach_link(&self, link: LinkSignal) {
        self.state.lock().link = Some(link);
    }

    /// Get a copy of all data written to the port.
    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Written queries decoded as text.
    pub fn written_queries(&self) -> Vec<String> {
        self.state
            .lock()
            .write_log
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Number of scripted replies not yet consumed.
    pub fn remaining_replies(&self) -> usize {
        self.state.lock().replies.len()
    }

    fn push_reply(&mut self, reply: Reply) -> &mut Self {
        self.state.lock().replies.push_back(reply);
        self
    }
}

#[async_trait]
impl AsyncSerialPortAdapter for MockSerialPort {
    async fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let link_lost = {
            let mut state = self.state.lock();
            if state.disconnected {
                return Err(PortError::Disconnected);
            }
            if state.fail_writes {
                return Err(PortError::Io(std::io::Error::other("write rejected")));
            }
            state.write_log.push(data.to_vec());

            match state.replies.pop_front() {
                Some(Reply::Chunks(chunks)) => {
                    state.pending.extend(chunks);
                    None
                }
                Some(Reply::ChunksThenDisconnect(chunks)) => {
                    state.pending.extend(chunks);
                    state.disconnected = true;
                    state.link.clone()
                }
                Some(Reply::Silence) | None => None,
            }
        };

        if let Some(link) = link_lost {
            link.disconnect();
        }
        self.readable.notify_one();
        Ok(data.len())
    }

    async fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(mut chunk) = state.pending.pop_front() {
                    let n = chunk.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        state.pending.push_front(chunk.split_off(n));
                    }
                    return Ok(n);
                }
                if state.disconnected {
                    return Err(PortError::Disconnected);
                }
            }
            self.readable.notified().await;
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &PortConfiguration {
        &self.config
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("remaining_replies", &self.remaining_replies())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reply_released_by_write() {
        let mut port = MockSerialPort::new("MOCK0");
        port.reply(b"Hello");

        port.write_bytes(b"$LOAD-INFO").await.unwrap();
        let mut buffer = [0u8; 10];
        let n = port.read_bytes(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..n], b"Hello");
        assert_eq!(port.remaining_replies(), 0);
    }

    #[tokio::test]
    async fn test_partial_read_keeps_remainder() {
        let mut port = MockSerialPort::new("MOCK0");
        port.reply(b"Hello, World!");
        port.write_bytes(b"q").await.unwrap();

        let mut buffer = [0u8; 5];
        let n = port.read_bytes(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..n], b"Hello");

        let mut rest = [0u8; 32];
        let n = port.read_bytes(&mut rest).await.unwrap();
        assert_eq!(&rest[..n], b", World!");
    }

    #[tokio::test]
    async fn test_chunked_reply() {
        let mut port = MockSerialPort::new("MOCK0");
        port.reply_in_chunks(b"abcdefg", 3);
        port.write_bytes(b"q").await.unwrap();

        let mut buffer = [0u8; 16];
        let mut seen = Vec::new();
        for _ in 0..3 {
            let n = port.read_bytes(&mut buffer).await.unwrap();
            seen.push(buffer[..n].to_vec());
        }
        assert_eq!(seen, vec![b"abc".to_vec(), b"def".to_vec(), b"g".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_blocks_reads() {
        let mut port = MockSerialPort::new("MOCK0");
        port.reply_silence();
        port.write_bytes(b"q").await.unwrap();

        let mut buffer = [0u8; 4];
        let result =
            tokio::time::timeout(Duration::from_millis(50), port.read_bytes(&mut buffer)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_write_logging() {
        let mut port = MockSerialPort::new("MOCK0");
        port.write_bytes(b"Test1").await.unwrap();
        port.write_bytes(b"Test2").await.unwrap();

        let log = port.get_write_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], b"Test1");
        assert_eq!(log[1], b"Test2");
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let mut port = MockSerialPort::new("MOCK0");
        port.set_fail_writes(true);
        let result = port.write_bytes(b"$LOAD-INFO").await;
        assert!(matches!(result, Err(PortError::Io(_))));
        assert!(port.get_write_log().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_wakes_reader() {
        let mut port = MockSerialPort::new("MOCK0");
        let handle = port.clone();

        let reader = tokio::spawn(async move {
            let mut buffer = [0u8; 4];
            port.read_bytes(&mut buffer).await
        });
        tokio::task::yield_now().await;
        handle.disconnect();

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(PortError::Disconnected)));
    }
}
