//! Energy meter link library
//!
//! Host-side client for the USB energy-meter logger. It finds the meter by
//! USB identity, runs its `$`-sentinel command protocol over the serial link
//! and decodes the responses into typed records.
//!
//! # Modules
//!
//! - `port`: serial transport adapters, USB discovery and a scripted mock
//! - `session`: an open port plus its link state
//! - `connector`: opening sessions (USB or mock)
//! - `protocol`: commands, the transaction engine and frame parsers
//! - `service`: the connection orchestrator and command operations
//! - `state`: connection state and the device cache
//! - `bundle`: ZIP packing of downloaded files
//! - `format`: human-readable sizes
//! - `config`: configuration management with TOML support
//! - `error`: unified error handling
//!
//! # Example
//!
//! ```no_run
//! use energymeter_link::{MeterService, UsbConnector};
//!
//! # async fn example() -> Result<(), energymeter_link::ClientError> {
//! let meter = MeterService::new(UsbConnector::new());
//! let info = meter.load_info().await?;
//! println!("meter {} is {:.2}% full", info.device_id, info.usage_percent());
//!
//! for file in meter.load_list().await? {
//!     println!("{} ({} bytes)", file.name, file.size_bytes);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod config;
pub mod connector;
pub mod error;
pub mod format;
pub mod port;
pub mod protocol;
pub mod service;
pub mod session;
pub mod state;

// Re-export commonly used types for convenience
pub use connector::{Connector, MockConnector, UsbConnector};
pub use error::{ClientError, ClientResult, ErrorKind, ErrorReport};
pub use port::{MockSerialPort, PortError, ENERGY_METER};
pub use protocol::{
    Command, DeviceId, DeviceInfo, FileBlob, FileEntry, FileName, FrameError, Response,
    TimeoutBudget, TransferStats,
};
pub use service::{Confirm, DeletePrompt, Deletion, FixedAnswer, MeterService};
pub use session::{Session, SessionMetrics};
pub use state::{ConnectionState, DeviceCache, Inventory};
