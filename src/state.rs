use crate::protocol::{DeviceInfo, FileEntry, TransferStats};
use chrono::{NaiveDateTime, TimeDelta};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;

/// A type alias for the shared, thread-safe device cache.
pub type SharedCache = Arc<Mutex<DeviceCache>>;

/// Where the connection to the meter stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { port: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// What the client last learned from the device. Cleared whenever the
/// session ends.
#[derive(Debug, Clone, Default)]
pub struct DeviceCache {
    info: Option<DeviceInfo>,
    fetched_at: Option<Instant>,
    files: Option<Vec<FileEntry>>,
    last_transfer: Option<TransferStats>,
}

impl DeviceCache {
    pub fn record_info(&mut self, info: DeviceInfo) {
        self.info = Some(info);
        self.fetched_at = Some(Instant::now());
    }

    pub fn record_files(&mut self, files: Vec<FileEntry>) {
        self.files = Some(files);
    }

    pub fn record_transfer(&mut self, stats: TransferStats) {
        self.last_transfer = Some(stats);
    }

    pub fn info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    pub fn files(&self) -> Option<&[FileEntry]> {
        self.files.as_deref()
    }

    pub fn last_transfer(&self) -> Option<TransferStats> {
        self.last_transfer
    }

    /// Size of a listed file, if the last listing contained it.
    pub fn file_size(&self, name: &str) -> Option<u32> {
        self.files()?
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.size_bytes)
    }

    /// The device clock as of now: the last reported RTC advanced by the
    /// whole seconds elapsed since it was read.
    pub fn clock(&self) -> Option<NaiveDateTime> {
        self.clock_at(Instant::now())
    }

    pub fn clock_at(&self, now: Instant) -> Option<NaiveDateTime> {
        let info = self.info.as_ref()?;
        let fetched_at = self.fetched_at?;
        let elapsed = now.saturating_duration_since(fetched_at).as_secs();
        let elapsed = TimeDelta::try_seconds(i64::try_from(elapsed).ok()?)?;
        info.rtc.checked_add_signed(elapsed)
    }

    /// Totals over the last file listing.
    pub fn inventory(&self) -> Option<Inventory> {
        self.files().map(Inventory::of)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// File count and combined size of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub files: usize,
    pub bytes: u64,
}

impl Inventory {
    pub fn of(entries: &[FileEntry]) -> Self {
        Self {
            files: entries.len(),
            bytes: entries.iter().map(|e| u64::from(e.size_bytes)).sum(),
        }
    }
}
