//! The meter's USB command/response protocol.
//!
//! Queries are plain ASCII: a `$`-prefixed command token, optionally followed
//! by one space and arguments. Responses carry no length header at the
//! transaction level; a response is complete once its terminator (or
//! `$ERROR`) shows up in the stream. Only the file payloads inside LOAD-ALL
//! and LOAD-ONE are length-prefixed.
//!
//! ```text
//! $SET-ID 00042                 -> $OK
//! $SET-RTC 23-06-01-12-30-00    -> $OK
//! $LOAD-INFO                    -> <id> <total> <free> <sector size> <yy-mm-dd-HH-MM-ss>$OK
//! $LOAD-LIST                    -> ($FILE-ENTRY <size> <name>)* $OK
//! $LOAD-ALL                     -> ($FILE-ENTRY <size> <name> <bytes>)* $OK
//! $LOAD-ONE <len> <name>        -> $FILE-START <size> <bytes>$FILE-END
//! $DELETE-ALL                   -> $OK
//! $DELETE-ONE <len> <name>      -> $OK
//! ```

pub mod command;
pub mod cursor;
pub mod parser;
pub mod response;
pub mod transaction;

pub use command::{Command, CommandKind, DeviceId, FileName, TimeoutBudget, TimeoutClass};
pub use cursor::ByteCursor;
pub use parser::{DeviceInfo, FileBlob, FileEntry, FrameError};
pub use response::{Response, TransferStats};
pub use transaction::transceive;

/// Command tokens (host to device).
pub mod cmd {
    pub const SET_ID: &str = "$SET-ID";
    pub const SET_RTC: &str = "$SET-RTC";
    pub const LOAD_INFO: &str = "$LOAD-INFO";
    pub const LOAD_LIST: &str = "$LOAD-LIST";
    pub const LOAD_ALL: &str = "$LOAD-ALL";
    pub const LOAD_ONE: &str = "$LOAD-ONE";
    pub const DELETE_ALL: &str = "$DELETE-ALL";
    pub const DELETE_ONE: &str = "$DELETE-ONE";
}

/// Response tokens (device to host).
pub mod resp {
    pub const FILE_ENTRY: &str = "$FILE-ENTRY";
    pub const FILE_START: &str = "$FILE-START";
    pub const FILE_END: &str = "$FILE-END";
    pub const OK: &str = "$OK";
    pub const ERROR: &str = "$ERROR";
}

/// Device id meaning "not configured".
pub const DEVICE_ID_INVALID: u16 = 0xFFFF;

/// Device id addressing every meter at once.
pub const DEVICE_ID_BROADCAST: u16 = 0xFFFE;
