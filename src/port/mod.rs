//! Port abstraction layer for serial communication.
//!
//! Provides the async transport trait, the tokio-serial implementation,
//! USB discovery, and a scripted mock for tests.

pub mod async_port;
pub mod discovery;
pub mod error;
pub mod mock;
pub mod traits;

pub use async_port::TokioSerialPort;
pub use error::PortError;
pub use mock::MockSerialPort;
pub use traits::*;
