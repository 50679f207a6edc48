//! Transport session: the open port plus its link state.
//!
//! A `Session` owns the port exclusively. Link loss is reported out of band
//! through a `LinkSignal` held by whoever watches the transport (the presence
//! monitor for real hardware, the mock port in tests) and observed through
//! the session's `LinkMonitor`.

use crate::port::AsyncSerialPortAdapter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Create a connected link signal/monitor pair. The link starts up.
pub fn link() -> (LinkSignal, LinkMonitor) {
    let (tx, rx) = watch::channel(true);
    (LinkSignal(Arc::new(tx)), LinkMonitor(rx))
}

/// Reporting side of a link: flips it down when the device goes away.
#[derive(Debug, Clone)]
pub struct LinkSignal(Arc<watch::Sender<bool>>);

impl LinkSignal {
    /// Mark the link as lost. Idempotent.
    pub fn disconnect(&self) {
        self.0.send_replace(false);
    }

    /// Resolves once every monitor has been dropped.
    pub async fn closed(&self) {
        self.0.closed().await
    }
}

/// Observing side of a link.
#[derive(Debug, Clone)]
pub struct LinkMonitor(watch::Receiver<bool>);

impl LinkMonitor {
    /// Whether the link is still up.
    pub fn is_up(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves when the link goes down. Never resolves if every signal is
    /// dropped while the link is still up.
    pub async fn lost(&mut self) {
        let observed = self.0.wait_for(|up| !*up).await.map(|_| ());
        if observed.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionMetrics {
    pub bytes_read_total: u64,
    pub bytes_written_total: u64,
    pub transactions: u64,
    pub open_duration_ms: u64,
}

/// An open connection to the meter.
pub struct Session {
    port: Box<dyn AsyncSerialPortAdapter>,
    link: LinkMonitor,
    opened_at: Instant,
    bytes_read_total: u64,
    bytes_written_total: u64,
    transactions: u64,
}

impl Session {
    pub fn new(port: Box<dyn AsyncSerialPortAdapter>, link: LinkMonitor) -> Self {
        Self {
            port,
            link,
            opened_at: Instant::now(),
            bytes_read_total: 0,
            bytes_written_total: 0,
            transactions: 0,
        }
    }

    /// Whether the underlying link is still up.
    pub fn is_open(&self) -> bool {
        self.link.is_up()
    }

    pub fn port_name(&self) -> &str {
        self.port.name()
    }

    /// A monitor for this session's link, for use outside the session.
    pub fn link(&self) -> LinkMonitor {
        self.link.clone()
    }

    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics {
            bytes_read_total: self.bytes_read_total,
            bytes_written_total: self.bytes_written_total,
            transactions: self.transactions,
            open_duration_ms: self.opened_at.elapsed().as_millis() as u64,
        }
    }

    pub(crate) fn port_mut(&mut self) -> &mut dyn AsyncSerialPortAdapter {
        self.port.as_mut()
    }

    pub(crate) fn record_write(&mut self, bytes: usize) {
        self.bytes_written_total += bytes as u64;
    }

    pub(crate) fn record_read(&mut self, bytes: usize) {
        self.bytes_read_total += bytes as u64;
    }

    pub(crate) fn record_transaction(&mut self) {
        self.transactions += 1;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.port.name())
            .field("open", &self.is_open())
            .field("transactions", &self.transactions)
            .finish()
    }
}
