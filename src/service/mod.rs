//! Service layer for meter operations.
//!
//! `MeterService` owns the connection to the meter and is the only way
//! commands reach it. It opens the session lazily on the first command,
//! reuses it afterwards, and drops it when the link goes away.
//!
//! # Architecture
//!
//! ```text
//! CLI ──> MeterService ──> Connector ──> Session (port + link)
//!              │                             ▲
//!              ├──> transceive ──────────────┘
//!              ├──> frame parsers
//!              └──> DeviceCache / watch<ConnectionState>
//! ```
//!
//! One command runs at a time: the session slot sits behind an async mutex
//! that is held for the whole command, follow-up refreshes included.

mod confirm;

pub use confirm::{Confirm, DeletePrompt, FixedAnswer};

use crate::config::Config;
use crate::connector::{Connector, UsbConnector};
use crate::error::{ClientError, ClientResult};
use crate::protocol::parser::{self, FrameError};
use crate::protocol::{
    transceive, Command, DeviceId, DeviceInfo, FileBlob, FileEntry, FileName, Response,
    TimeoutBudget, TransferStats,
};
use crate::session::{Session, SessionMetrics};
use crate::state::{ConnectionState, SharedCache};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Outcome of a delete request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Deletion {
    /// The device deleted the file(s). `remaining` is the refreshed listing,
    /// or `None` if re-reading it failed.
    Deleted { remaining: Option<Vec<FileEntry>> },
    /// The user said no. The device was not contacted.
    Declined,
}

/// The single session slot.
#[derive(Default)]
struct LinkSlot {
    session: Option<Session>,
    /// Bumped on every connect so a stale watcher can't clear a newer session.
    generation: u64,
    watcher: Option<AbortHandle>,
}

impl Drop for LinkSlot {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// How `ensure_session` found the link.
enum Opened {
    Reused,
    /// Just connected; carries the result of the initial info + list refresh.
    Fresh(ClientResult<Vec<FileEntry>>),
}

/// Client for one energy meter.
#[derive(Clone)]
pub struct MeterService {
    connector: Arc<dyn Connector>,
    budget: TimeoutBudget,
    slot: Arc<Mutex<LinkSlot>>,
    cache: SharedCache,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl MeterService {
    pub fn new(connector: impl Connector + 'static) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector: Arc::new(connector),
            budget: TimeoutBudget::default(),
            slot: Arc::new(Mutex::new(LinkSlot::default())),
            cache: SharedCache::default(),
            state: Arc::new(state),
        }
    }

    /// A service talking to the USB meter as configured.
    pub fn from_config(config: &Config) -> Self {
        let mut connector = UsbConnector::new().with_presence_poll(config.device.presence_poll());
        if let Some(port) = &config.device.port {
            connector = connector.with_port(port.clone());
        }
        Self::new(connector).with_timeouts(config.timeouts.budget())
    }

    pub fn with_timeouts(mut self, budget: TimeoutBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn timeouts(&self) -> TimeoutBudget {
        self.budget
    }

    // ========== Connection ==========

    /// Open the session now instead of on the first command.
    ///
    /// # Errors
    ///
    /// - `DeviceNotFound` if no meter is attached
    /// - `OpenFailed` if the port could not be opened
    pub async fn connect(&self) -> ClientResult<()> {
        let mut slot = self.slot.lock().await;
        self.ready(&mut slot).await
    }

    /// Close the session, if any. Idempotent.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        self.drop_session(&mut slot, "closed");
    }

    // ========== Commands ==========

    /// `$SET-ID`, then re-read the device info.
    ///
    /// Once the device has accepted the id the call succeeds. The re-read
    /// info is `None` if that follow-up LOAD-INFO failed.
    ///
    /// # Errors
    ///
    /// Any connection or transaction failure of the SET-ID itself.
    pub async fn set_id(&self, id: DeviceId) -> ClientResult<Option<DeviceInfo>> {
        let mut slot = self.slot.lock().await;
        self.ready(&mut slot).await?;
        self.run(&mut slot, &Command::SetId(id)).await?;
        info!(device_id = id.get(), "device id set");
        Ok(followup(self.fetch_info(&mut slot).await))
    }

    /// `$SET-RTC` with the given local time, then re-read the device info.
    /// Same outcome rules as [`set_id`](Self::set_id).
    pub async fn set_rtc(&self, at: NaiveDateTime) -> ClientResult<Option<DeviceInfo>> {
        let mut slot = self.slot.lock().await;
        self.ready(&mut slot).await?;
        self.run(&mut slot, &Command::SetRtc(at)).await?;
        info!(rtc = %at, "device clock set");
        Ok(followup(self.fetch_info(&mut slot).await))
    }

    /// Set the device clock to the host's local time.
    pub async fn sync_clock(&self) -> ClientResult<Option<DeviceInfo>> {
        self.set_rtc(Local::now().naive_local()).await
    }

    /// `$LOAD-INFO`.
    pub async fn load_info(&self) -> ClientResult<DeviceInfo> {
        let mut slot = self.slot.lock().await;
        match self.ensure_session(&mut slot).await? {
            Opened::Fresh(_) => {
                if let Some(info) = self.cache.lock().info().cloned() {
                    return Ok(info);
                }
            }
            Opened::Reused => {}
        }
        self.fetch_info(&mut slot).await
    }

    /// `$LOAD-INFO` followed by `$LOAD-LIST`.
    pub async fn load_list(&self) -> ClientResult<Vec<FileEntry>> {
        let mut slot = self.slot.lock().await;
        match self.ensure_session(&mut slot).await? {
            Opened::Fresh(refreshed) => refreshed,
            Opened::Reused => self.refresh(&mut slot).await,
        }
    }

    /// `$LOAD-ALL`: every file on the device.
    pub async fn load_all(&self) -> ClientResult<Vec<FileBlob>> {
        let mut slot = self.slot.lock().await;
        self.ready(&mut slot).await?;

        let command = Command::LoadAll;
        let response = self.run(&mut slot, &command).await?;
        let blobs = parser::parse_bulk_files(&response.bytes)
            .map_err(|source| malformed(&command, &response, source))?;
        info!(files = blobs.len(), bytes = response.len(), "downloaded all files");
        Ok(blobs)
    }

    /// `$LOAD-ONE`: a single file by name.
    pub async fn load_one(&self, name: &FileName) -> ClientResult<FileBlob> {
        let mut slot = self.slot.lock().await;
        self.ready(&mut slot).await?;

        if let Some(expected) = self.cache.lock().file_size(name.as_str()) {
            debug!(file = %name, expected, "expecting file");
        }
        let command = Command::LoadOne(name.clone());
        let response = self.run(&mut slot, &command).await?;
        let blob = parser::parse_single_file(&response.bytes, name)
            .map_err(|source| malformed(&command, &response, source))?;
        info!(file = %name, bytes = blob.size_bytes, "downloaded file");
        Ok(blob)
    }

    /// `$DELETE-ALL`, after confirmation. On success the listing is
    /// refreshed and returned; a failed refresh does not undo the success.
    pub async fn delete_all(&self, confirm: &dyn Confirm) -> ClientResult<Deletion> {
        self.delete(Command::DeleteAll, DeletePrompt::All, confirm).await
    }

    /// `$DELETE-ONE`, after confirmation. On success the listing is
    /// refreshed and returned.
    pub async fn delete_one(&self, name: &FileName, confirm: &dyn Confirm) -> ClientResult<Deletion> {
        self.delete(
            Command::DeleteOne(name.clone()),
            DeletePrompt::One(name.clone()),
            confirm,
        )
        .await
    }

    async fn delete(
        &self,
        command: Command,
        prompt: DeletePrompt,
        confirm: &dyn Confirm,
    ) -> ClientResult<Deletion> {
        // asked before the lock: a pending prompt must not block other commands
        if !confirm.confirm(&prompt).await {
            info!(command = %command.kind(), "deletion declined");
            return Ok(Deletion::Declined);
        }

        let mut slot = self.slot.lock().await;
        self.ready(&mut slot).await?;
        self.run(&mut slot, &command).await?;
        info!(command = %command.kind(), "deleted");

        let remaining = followup(self.refresh(&mut slot).await);
        Ok(Deletion::Deleted { remaining })
    }

    // ========== Observers ==========

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Connection state changes, for presentation layers.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn cached_info(&self) -> Option<DeviceInfo> {
        self.cache.lock().info().cloned()
    }

    pub fn cached_files(&self) -> Option<Vec<FileEntry>> {
        self.cache.lock().files().map(<[FileEntry]>::to_vec)
    }

    /// Estimated current device time.
    pub fn device_clock(&self) -> Option<NaiveDateTime> {
        self.cache.lock().clock()
    }

    /// Stats of the most recent successful transaction.
    pub fn last_transfer(&self) -> Option<TransferStats> {
        self.cache.lock().last_transfer()
    }

    /// Counters of the current session. Waits for any running command.
    pub async fn session_metrics(&self) -> Option<SessionMetrics> {
        self.slot.lock().await.session.as_ref().map(Session::metrics)
    }

    // ========== Internals ==========

    /// Ensure a session, ignoring a failed initial refresh. The refresh only
    /// fills the cache; the caller's own command decides success.
    async fn ready(&self, slot: &mut LinkSlot) -> ClientResult<()> {
        if let Opened::Fresh(Err(err)) = self.ensure_session(slot).await? {
            warn!(error = %err, "initial refresh failed");
        }
        Ok(())
    }

    async fn ensure_session(&self, slot: &mut LinkSlot) -> ClientResult<Opened> {
        match slot.session.as_ref().map(Session::is_open) {
            Some(true) => return Ok(Opened::Reused),
            Some(false) => self.drop_session(slot, "link lost"),
            None => {}
        }

        self.state.send_replace(ConnectionState::Connecting);
        let session = match self.connector.connect().await {
            Ok(session) => session,
            Err(err) => {
                if err.is_benign() {
                    info!("{err}");
                } else {
                    warn!(error = %err, "connect failed");
                }
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        let port = session.port_name().to_owned();
        slot.generation += 1;
        slot.watcher = Some(self.watch_link(&session, slot.generation));
        slot.session = Some(session);
        self.state
            .send_replace(ConnectionState::Connected { port: port.clone() });
        info!(port = %port, "session opened");

        Ok(Opened::Fresh(self.refresh(slot).await))
    }

    /// Clear the session when its link drops, even with no command running.
    fn watch_link(&self, session: &Session, generation: u64) -> AbortHandle {
        let mut link = session.link();
        let port = session.port_name().to_owned();
        let slot: Weak<Mutex<LinkSlot>> = Arc::downgrade(&self.slot);
        let cache = Arc::clone(&self.cache);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            link.lost().await;
            warn!(port = %port, "meter disconnected");
            cache.lock().clear();
            state.send_replace(ConnectionState::Disconnected);

            if let Some(slot) = slot.upgrade() {
                let mut slot = slot.lock().await;
                if slot.generation == generation {
                    slot.session = None;
                    slot.watcher = None;
                }
            }
        })
        .abort_handle()
    }

    fn drop_session(&self, slot: &mut LinkSlot, reason: &str) {
        if let Some(watcher) = slot.watcher.take() {
            watcher.abort();
        }
        if let Some(session) = slot.session.take() {
            info!(port = session.port_name(), reason, "session closed");
        }
        self.cache.lock().clear();
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// One transaction on the current session. Drops the session only when
    /// the failure shows the link is gone; a timeout leaves it in place.
    async fn run(&self, slot: &mut LinkSlot, command: &Command) -> ClientResult<Response> {
        let session = slot.session.as_mut().ok_or(ClientError::NotConnected)?;
        let result = transceive(
            session,
            &command.query(),
            command.terminator(),
            command.timeout(&self.budget),
        )
        .await;

        match &result {
            Ok(response) => self.cache.lock().record_transfer(response.stats()),
            Err(err) => {
                if !session.is_open() || err.is_link_loss() {
                    self.drop_session(slot, "link lost during transaction");
                }
            }
        }
        result
    }

    async fn fetch_info(&self, slot: &mut LinkSlot) -> ClientResult<DeviceInfo> {
        let command = Command::LoadInfo;
        let response = self.run(slot, &command).await?;
        let info = parser::parse_device_info(&response.text)
            .map_err(|source| malformed(&command, &response, source))?;
        debug!(device_id = info.device_id, rtc = %info.rtc, "device info");
        self.cache.lock().record_info(info.clone());
        Ok(info)
    }

    async fn fetch_list(&self, slot: &mut LinkSlot) -> ClientResult<Vec<FileEntry>> {
        let command = Command::LoadList;
        let response = self.run(slot, &command).await?;
        let files = parser::parse_file_list(&response.text)
            .map_err(|source| malformed(&command, &response, source))?;
        debug!(files = files.len(), "file list");
        self.cache.lock().record_files(files.clone());
        Ok(files)
    }

    /// LOAD-INFO then LOAD-LIST.
    async fn refresh(&self, slot: &mut LinkSlot) -> ClientResult<Vec<FileEntry>> {
        self.fetch_info(slot).await?;
        self.fetch_list(slot).await
    }
}

impl std::fmt::Debug for MeterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterService")
            .field("connector", &self.connector)
            .field("budget", &self.budget)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// The re-read after a command the device already applied. Its failure is
/// logged and must not turn the command into an error.
fn followup<T>(result: ClientResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "command applied, but the follow-up refresh failed");
            None
        }
    }
}

fn malformed(command: &Command, response: &Response, source: FrameError) -> ClientError {
    ClientError::MalformedResponse {
        query: command.query(),
        response: response.text.clone(),
        source,
    }
}
