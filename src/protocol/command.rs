//! Command vocabulary: query construction, terminators and timeout classes.

use super::{cmd, resp, DEVICE_ID_BROADCAST};
use crate::error::{ClientError, ClientResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Clock format sent with `$SET-RTC` (two-digit year, 24-hour).
pub const RTC_FORMAT: &str = "%y-%m-%d-%H-%M-%S";

/// A device id that may be written with `$SET-ID`.
///
/// 65534 (broadcast) and 65535 (unset marker) are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DeviceId(u16);

impl DeviceId {
    pub const MAX: u16 = DEVICE_ID_BROADCAST - 1;

    pub fn new(id: u16) -> ClientResult<Self> {
        if id > Self::MAX {
            return Err(ClientError::invalid(format!(
                "device id {id} is reserved (settable range is 0..={})",
                Self::MAX
            )));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<i64> for DeviceId {
    type Error = ClientError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let id = u16::try_from(value)
            .map_err(|_| ClientError::invalid(format!("device id {value} is out of range")))?;
        Self::new(id)
    }
}

impl FromStr for DeviceId {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: i64 = trimmed
            .parse()
            .map_err(|_| ClientError::invalid(format!("device id `{trimmed}` is not an integer")))?;
        Self::try_from(value)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:05}", self.0)
    }
}

/// A file name as stored on the meter.
///
/// Names travel inside space- and `$`-delimited frames, so they must be
/// printable ASCII without either character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileName(String);

impl FileName {
    pub fn new(name: impl Into<String>) -> ClientResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ClientError::invalid("file name is empty"));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !c.is_ascii_graphic() || *c == '$')
        {
            return Err(ClientError::invalid(format!(
                "file name `{name}` contains unsupported character {bad:?}"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for FileName {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which timeout budget a command runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClass {
    /// Short exchanges answered with a single `$OK`.
    Control,
    /// File listing.
    List,
    /// File content transfers.
    Bulk,
}

/// Per-class idle timeouts for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBudget {
    pub control: Duration,
    pub list: Duration,
    pub bulk: Duration,
}

impl TimeoutBudget {
    pub fn for_class(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Control => self.control,
            TimeoutClass::List => self.list,
            TimeoutClass::Bulk => self.bulk,
        }
    }
}

impl Default for TimeoutBudget {
    fn default() -> Self {
        Self {
            control: Duration::from_millis(500),
            list: Duration::from_millis(5_000),
            bulk: Duration::from_secs(5 * 60),
        }
    }
}

/// Fieldless view of [`Command`], for logging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    SetId,
    SetRtc,
    LoadInfo,
    LoadList,
    LoadAll,
    LoadOne,
    DeleteAll,
    DeleteOne,
}

impl CommandKind {
    /// The command token, including its `$` prefix.
    pub fn token(self) -> &'static str {
        match self {
            Self::SetId => cmd::SET_ID,
            Self::SetRtc => cmd::SET_RTC,
            Self::LoadInfo => cmd::LOAD_INFO,
            Self::LoadList => cmd::LOAD_LIST,
            Self::LoadAll => cmd::LOAD_ALL,
            Self::LoadOne => cmd::LOAD_ONE,
            Self::DeleteAll => cmd::DELETE_ALL,
            Self::DeleteOne => cmd::DELETE_ONE,
        }
    }

    pub fn terminator(self) -> &'static str {
        match self {
            Self::LoadOne => resp::FILE_END,
            _ => resp::OK,
        }
    }

    pub fn timeout_class(self) -> TimeoutClass {
        match self {
            Self::LoadList => TimeoutClass::List,
            Self::LoadAll | Self::LoadOne => TimeoutClass::Bulk,
            _ => TimeoutClass::Control,
        }
    }

    /// Commands that erase data on the device.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::DeleteAll | Self::DeleteOne)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token().trim_start_matches('$'))
    }
}

/// One request to the meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetId(DeviceId),
    SetRtc(NaiveDateTime),
    LoadInfo,
    LoadList,
    LoadAll,
    LoadOne(FileName),
    DeleteAll,
    DeleteOne(FileName),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::SetId(_) => CommandKind::SetId,
            Self::SetRtc(_) => CommandKind::SetRtc,
            Self::LoadInfo => CommandKind::LoadInfo,
            Self::LoadList => CommandKind::LoadList,
            Self::LoadAll => CommandKind::LoadAll,
            Self::LoadOne(_) => CommandKind::LoadOne,
            Self::DeleteAll => CommandKind::DeleteAll,
            Self::DeleteOne(_) => CommandKind::DeleteOne,
        }
    }

    /// The exact query string written to the wire.
    pub fn query(&self) -> String {
        let token = self.kind().token();
        match self {
            Self::SetId(id) => format!("{token} {id}"),
            Self::SetRtc(at) => format!("{token} {}", at.format(RTC_FORMAT)),
            Self::LoadOne(name) | Self::DeleteOne(name) => {
                format!("{token} {} {name}", name.as_str().len())
            }
            Self::LoadInfo | Self::LoadList | Self::LoadAll | Self::DeleteAll => token.to_owned(),
        }
    }

    pub fn terminator(&self) -> &'static str {
        self.kind().terminator()
    }

    pub fn timeout(&self, budget: &TimeoutBudget) -> Duration {
        budget.for_class(self.kind().timeout_class())
    }

    pub fn is_destructive(&self) -> bool {
        self.kind().is_destructive()
    }
}
