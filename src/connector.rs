//! Opening sessions.
//!
//! A [`Connector`] turns "talk to the meter" into an open [`Session`]. The USB
//! connector finds the meter by vendor/product id, opens it at 9600 8N1 and
//! starts a presence monitor that reports unplugging through the session's
//! link. The mock connector hands out scripted ports for tests.

use crate::error::{ClientError, ClientResult};
use crate::port::{
    discovery, MockSerialPort, PortConfiguration, PortError, TokioSerialPort, UsbIdentity,
    ENERGY_METER,
};
use crate::session::{link, LinkSignal, Session};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default interval between presence checks.
pub const DEFAULT_PRESENCE_POLL: Duration = Duration::from_secs(1);

#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Open a new session.
    ///
    /// # Errors
    ///
    /// - `DeviceNotFound` if no meter is attached
    /// - `OpenFailed` if the meter was found but could not be opened
    async fn connect(&self) -> ClientResult<Session>;
}

/// Connects to the meter over USB CDC.
#[derive(Debug, Clone)]
pub struct UsbConnector {
    identity: UsbIdentity,
    port: Option<String>,
    presence_poll: Duration,
}

impl UsbConnector {
    pub fn new() -> Self {
        Self {
            identity: ENERGY_METER,
            port: None,
            presence_poll: DEFAULT_PRESENCE_POLL,
        }
    }

    /// Use this port path instead of searching by USB identity.
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_presence_poll(mut self, interval: Duration) -> Self {
        self.presence_poll = interval;
        self
    }

    async fn resolve_port(&self) -> ClientResult<String> {
        if let Some(port) = &self.port {
            return Ok(port.clone());
        }

        let identity = self.identity;
        let found = tokio::task::spawn_blocking(move || discovery::find_device(identity))
            .await
            .map_err(|e| PortError::Io(std::io::Error::other(e)))
            .and_then(|result| result)
            .map_err(|source| ClientError::OpenFailed {
                port: format!("usb {identity}"),
                source,
            })?;

        found.ok_or(ClientError::DeviceNotFound { identity })
    }
}

impl Default for UsbConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for UsbConnector {
    async fn connect(&self) -> ClientResult<Session> {
        let port_name = self.resolve_port().await?;
        debug!(port = %port_name, "opening meter port");

        let port = TokioSerialPort::open(&port_name, &PortConfiguration::default()).map_err(
            |source| ClientError::OpenFailed {
                port: port_name.clone(),
                source,
            },
        )?;

        let (signal, monitor) = link();
        // an explicitly configured port may not report USB ids
        let identity = self.port.is_none().then_some(self.identity);
        tokio::spawn(watch_presence(
            signal,
            port_name.clone(),
            identity,
            self.presence_poll,
        ));

        info!(port = %port_name, "meter connected");
        Ok(Session::new(Box::new(port), monitor))
    }
}

/// Poll the port list until the device disappears or the session is gone.
async fn watch_presence(
    signal: LinkSignal,
    port_name: String,
    identity: Option<UsbIdentity>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = signal.closed() => {
                debug!(port = %port_name, "session dropped; presence monitor exiting");
                return;
            }
            _ = ticker.tick() => {
                let name = port_name.clone();
                let present = tokio::task::spawn_blocking(move || discovery::is_present(&name, identity))
                    .await
                    .unwrap_or(true);
                if !present {
                    warn!(port = %port_name, "meter disconnected");
                    signal.disconnect();
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct MockConnectorState {
    /// `None` entries simulate "no device attached".
    ports: VecDeque<Option<MockSerialPort>>,
    connects: usize,
}

/// Hands out scripted ports in order. Once the queue is empty every connect
/// reports `DeviceNotFound`.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(port: MockSerialPort) -> Self {
        let connector = Self::new();
        connector.push_port(port);
        connector
    }

    pub fn push_port(&self, port: MockSerialPort) {
        self.state.lock().ports.push_back(Some(port));
    }

    /// Make the next connect fail as if nothing were plugged in.
    pub fn push_unavailable(&self) {
        self.state.lock().ports.push_back(None);
    }

    /// Number of sessions successfully opened.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> ClientResult<Session> {
        let port = {
            let mut state = self.state.lock();
            let port = state.ports.pop_front().flatten();
            if port.is_some() {
                state.connects += 1;
            }
            port
        };
        let port = port.ok_or(ClientError::DeviceNotFound {
            identity: ENERGY_METER,
        })?;

        let (signal, monitor) = link();
        port.attach_link(signal);
        Ok(Session::new(Box::new(port), monitor))
    }
}
