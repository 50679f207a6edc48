use crate::port::{PortError, UsbIdentity};
use crate::protocol::FrameError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Coarse failure category, for presentation layers that only need to pick a
/// message template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DeviceNotFound,
    OpenFailed,
    WriteFailed,
    ReadFailed,
    Timeout,
    DeviceError,
    MalformedResponse,
    InvalidArgument,
    NotConnected,
}

/// Unified client error type.
///
/// Every transaction-level variant carries the query that was sent; the
/// receive-side variants also carry whatever response text had accumulated,
/// so a caller can show the user what the device actually said.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No port with the meter's USB identity is attached.
    #[error("No energy meter found (USB {identity})")]
    DeviceNotFound { identity: UsbIdentity },

    #[error("Failed to open {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: PortError,
    },

    #[error("Failed to send `{query}`: {source}")]
    WriteFailed {
        query: String,
        #[source]
        source: PortError,
    },

    #[error("Failed to receive the response to `{query}`: {source}")]
    ReadFailed {
        query: String,
        response: String,
        #[source]
        source: PortError,
    },

    #[error("No response to `{query}` within {timeout:?}")]
    Timeout {
        query: String,
        timeout: Duration,
        response: String,
    },

    /// The device answered with `$ERROR`.
    #[error("Device rejected `{query}`: {response}")]
    DeviceError { query: String, response: String },

    #[error("Malformed response to `{query}`: {source}")]
    MalformedResponse {
        query: String,
        response: String,
        #[source]
        source: FrameError,
    },

    /// Rejected before anything was transmitted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Device is not connected")]
    NotConnected,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceNotFound { .. } => ErrorKind::DeviceNotFound,
            Self::OpenFailed { .. } => ErrorKind::OpenFailed,
            Self::WriteFailed { .. } => ErrorKind::WriteFailed,
            Self::ReadFailed { .. } => ErrorKind::ReadFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::DeviceError { .. } => ErrorKind::DeviceError,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotConnected => ErrorKind::NotConnected,
        }
    }

    /// No device to talk to is an expected outcome, not a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::DeviceNotFound { .. })
    }

    /// Whether the transport reported that the device itself went away.
    pub fn is_link_loss(&self) -> bool {
        match self {
            Self::WriteFailed { source, .. } | Self::ReadFailed { source, .. } => {
                source.is_disconnect()
            }
            _ => false,
        }
    }

    /// The query the failure relates to, if one had been built.
    pub fn query(&self) -> Option<&str> {
        match self {
            Self::WriteFailed { query, .. }
            | Self::ReadFailed { query, .. }
            | Self::Timeout { query, .. }
            | Self::DeviceError { query, .. }
            | Self::MalformedResponse { query, .. } => Some(query),
            _ => None,
        }
    }

    /// Raw response text received before the failure, if any.
    pub fn response(&self) -> Option<&str> {
        match self {
            Self::ReadFailed { response, .. }
            | Self::Timeout { response, .. }
            | Self::DeviceError { response, .. }
            | Self::MalformedResponse { response, .. } => Some(response),
            _ => None,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Serialisable view of a failure, for machine-readable output.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl From<&ClientError> for ErrorReport {
    fn from(err: &ClientError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            query: err.query().map(str::to_owned),
            response: err.response().map(str::to_owned),
        }
    }
}
