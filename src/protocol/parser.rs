//! Frame parsers for the meter's responses.
//!
//! Text frames (LOAD-INFO, LOAD-LIST) are parsed from the lossily decoded
//! response text. File payloads (LOAD-ALL, LOAD-ONE) are parsed from raw
//! bytes with a [`ByteCursor`], since content may hold any byte value,
//! including `$`.
//!
//! Every structural violation is an error. Nothing is salvaged from a
//! partially valid frame.

use super::command::FileName;
use super::cursor::ByteCursor;
use super::{cmd, resp};
use chrono::{Datelike, Local, NaiveDateTime};
use memchr::memmem;
use serde::Serialize;
use thiserror::Error;

/// Structural decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("response does not end with `{token}`")]
    MissingTerminator { token: &'static str },

    #[error("expected `{token}` at offset {offset}")]
    MissingSentinel { token: &'static str, offset: usize },

    #[error("expected byte {:?} at offset {offset}", char::from(*expected))]
    UnexpectedByte { expected: u8, offset: usize },

    #[error("no {:?} delimiter after offset {offset}", char::from(*delimiter))]
    MissingDelimiter { delimiter: u8, offset: usize },

    #[error("empty field at offset {offset}")]
    EmptyField { offset: usize },

    #[error("invalid {field}: `{value}`")]
    InvalidField { field: &'static str, value: String },

    #[error("file entry {index} is malformed: `{segment}`")]
    BadEntry { index: usize, segment: String },

    #[error("{needed} byte(s) missing at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("device error sentinel at offset {offset}")]
    DeviceError { offset: usize },
}

/// Length of the `yy-mm-dd-HH-MM-ss` clock field.
const RTC_LEN: usize = 17;
/// Offset of the separator between the date and time halves of the clock.
const RTC_SPLIT: usize = 8;

/// Identity, storage geometry and clock reported by `$LOAD-INFO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_id: u16,
    pub total_sectors: u32,
    pub free_sectors: u32,
    pub sector_size: u32,
    pub rtc: NaiveDateTime,
}

impl DeviceInfo {
    pub fn total_bytes(&self) -> u64 {
        u64::from(self.total_sectors) * u64::from(self.sector_size)
    }

    pub fn free_bytes(&self) -> u64 {
        u64::from(self.free_sectors) * u64::from(self.sector_size)
    }

    pub fn used_bytes(&self) -> u64 {
        self.total_bytes().saturating_sub(self.free_bytes())
    }

    /// Used share of storage, 0.0 to 100.0. A device reporting no storage
    /// is 0% used.
    pub fn usage_percent(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 0.0;
        }
        self.used_bytes() as f64 / total as f64 * 100.0
    }

    /// Whether the id is one of the reserved markers rather than a real id.
    pub fn has_reserved_id(&self) -> bool {
        self.device_id >= super::DEVICE_ID_BROADCAST
    }
}

/// One record of a `$LOAD-LIST` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size_bytes: u32,
}

/// A downloaded file.
#[derive(Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub name: String,
    pub size_bytes: u32,
    pub content: Vec<u8>,
}

impl std::fmt::Debug for FileBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlob")
            .field("name", &self.name)
            .field("size_bytes", &self.size_bytes)
            .field("content_len", &self.content.len())
            .finish()
    }
}

/// Parse a `$LOAD-INFO` response, completing the two-digit year with the
/// current century.
pub fn parse_device_info(text: &str) -> Result<DeviceInfo, FrameError> {
    parse_device_info_in_century(text, Local::now().year() / 100)
}

/// Parse a `$LOAD-INFO` response:
/// `<id> <total sectors> <free sectors> <sector size> <yy-mm-dd-HH-MM-ss>$OK`.
pub fn parse_device_info_in_century(text: &str, century: i32) -> Result<DeviceInfo, FrameError> {
    let body = text
        .trim_end()
        .strip_suffix(resp::OK)
        .ok_or(FrameError::MissingTerminator { token: resp::OK })?;
    let body = body.strip_prefix(cmd::LOAD_INFO).unwrap_or(body).trim_start();

    let fields: Vec<&str> = body.split(' ').collect();
    let [id, total, free, sector, rtc] = fields[..] else {
        return Err(FrameError::FieldCount {
            expected: 5,
            found: fields.len(),
        });
    };

    Ok(DeviceInfo {
        device_id: number(id, "device id")?,
        total_sectors: number(total, "total sectors")?,
        free_sectors: number(free, "free sectors")?,
        sector_size: number(sector, "sector size")?,
        rtc: parse_rtc(rtc, century)?,
    })
}

fn parse_rtc(rtc: &str, century: i32) -> Result<NaiveDateTime, FrameError> {
    let invalid = || FrameError::InvalidField {
        field: "clock",
        value: rtc.to_owned(),
    };
    if rtc.len() != RTC_LEN {
        return Err(invalid());
    }
    let (date, time) = rtc.split_at_checked(RTC_SPLIT).ok_or_else(invalid)?;
    let time = time.strip_prefix('-').ok_or_else(invalid)?;

    NaiveDateTime::parse_from_str(&format!("{century:02}{date} {time}"), "%Y-%m-%d %H-%M-%S")
        .map_err(|_| invalid())
}

/// Parse a `$LOAD-LIST` response: `($FILE-ENTRY <size> <name>)*$OK`.
///
/// A single entry of size `0` is the device's way of saying it holds no
/// files.
pub fn parse_file_list(text: &str) -> Result<Vec<FileEntry>, FrameError> {
    let mut segments = text.split('$');
    if segments.next() != Some("") {
        return Err(FrameError::MissingSentinel {
            token: "$",
            offset: 0,
        });
    }
    let mut segments: Vec<&str> = segments.collect();
    if segments.last() != Some(&&resp::OK[1..]) {
        return Err(FrameError::MissingTerminator { token: resp::OK });
    }
    segments.pop();

    if let [only] = segments[..] {
        if only.split(' ').nth(1) == Some("0") {
            return Ok(Vec::new());
        }
    }

    let entry_tag = &resp::FILE_ENTRY[1..];
    segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let bad = || FrameError::BadEntry {
                index,
                segment: (*segment).to_owned(),
            };
            let tokens: Vec<&str> = segment.split(' ').collect();
            let [tag, size, name] = tokens[..] else {
                return Err(bad());
            };
            if tag != entry_tag || name.is_empty() {
                return Err(bad());
            }
            Ok(FileEntry {
                name: name.to_owned(),
                size_bytes: number(size, "file size")?,
            })
        })
        .collect()
}

/// Parse a `$LOAD-ALL` response:
/// `($FILE-ENTRY <size> <name> <size bytes of content>)*` followed by `$OK`.
///
/// Content is taken by byte count and never scanned, so it may contain
/// sentinel-looking bytes. Zero entries is a valid, empty result. A `$ERROR`
/// anywhere outside content fails the whole response.
pub fn parse_bulk_files(bytes: &[u8]) -> Result<Vec<FileBlob>, FrameError> {
    let mut cursor = ByteCursor::new(bytes);
    let mut blobs = Vec::new();

    while let Some(at) = cursor.find(resp::FILE_ENTRY.as_bytes()) {
        reject_error(&bytes[cursor.position()..at], cursor.position())?;
        cursor.seek(at)?;
        cursor.expect(resp::FILE_ENTRY)?;
        cursor.expect_byte(b' ')?;
        let size = size_field(&mut cursor)?;
        cursor.expect_byte(b' ')?;
        let name = name_field(&mut cursor)?;
        cursor.expect_byte(b' ')?;
        let content = cursor.take(size as usize)?;

        blobs.push(FileBlob {
            name,
            size_bytes: size,
            content: content.to_vec(),
        });
    }

    reject_error(cursor.rest(), cursor.position())?;
    if cursor.find(resp::OK.as_bytes()).is_none() {
        return Err(FrameError::MissingTerminator { token: resp::OK });
    }
    Ok(blobs)
}

/// Parse a `$LOAD-ONE` response: `$FILE-START <size> <content>$FILE-END`.
///
/// The device does not repeat the file name, so the requested one is used.
pub fn parse_single_file(bytes: &[u8], name: &FileName) -> Result<FileBlob, FrameError> {
    let mut cursor = ByteCursor::new(bytes);
    cursor.expect(resp::FILE_START)?;
    cursor.expect_byte(b' ')?;
    let size = size_field(&mut cursor)?;
    cursor.expect_byte(b' ')?;
    let content = cursor.take(size as usize)?;

    reject_error(cursor.rest(), cursor.position())?;
    if cursor.find(resp::FILE_END.as_bytes()).is_none() {
        return Err(FrameError::MissingTerminator {
            token: resp::FILE_END,
        });
    }

    Ok(FileBlob {
        name: name.as_str().to_owned(),
        size_bytes: size,
        content: content.to_vec(),
    })
}

/// Fail on a `$ERROR` in framing bytes; `base` is their offset in the response.
fn reject_error(framing: &[u8], base: usize) -> Result<(), FrameError> {
    match memmem::find(framing, resp::ERROR.as_bytes()) {
        Some(at) => Err(FrameError::DeviceError { offset: base + at }),
        None => Ok(()),
    }
}

fn size_field(cursor: &mut ByteCursor<'_>) -> Result<u32, FrameError> {
    let raw = cursor.take_until(b' ')?;
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| number::<u32>(s, "file size").ok())
        .ok_or_else(|| FrameError::InvalidField {
            field: "file size",
            value: String::from_utf8_lossy(raw).into_owned(),
        })
}

fn name_field(cursor: &mut ByteCursor<'_>) -> Result<String, FrameError> {
    let raw = cursor.take_until(b' ')?;
    if !raw.iter().all(u8::is_ascii_graphic) {
        return Err(FrameError::InvalidField {
            field: "file name",
            value: String::from_utf8_lossy(raw).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(raw).into_owned())
}

/// Strict decimal: ASCII digits only, no sign or whitespace.
fn number<T: std::str::FromStr>(raw: &str, field: &'static str) -> Result<T, FrameError> {
    let invalid = || FrameError::InvalidField {
        field,
        value: raw.to_owned(),
    };
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    raw.parse().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn entry_frame(name: &str, content: &[u8]) -> Vec<u8> {
        let mut out = format!("$FILE-ENTRY {} {} ", content.len(), name).into_bytes();
        out.extend_from_slice(content);
        out
    }

    #[test]
    fn test_device_info() {
        let info = parse_device_info_in_century("1 100 40 512 23-06-01-12-30-00$OK", 20).unwrap();
        assert_eq!(info.device_id, 1);
        assert_eq!(info.total_sectors, 100);
        assert_eq!(info.free_sectors, 40);
        assert_eq!(info.sector_size, 512);
        assert_eq!(info.total_bytes(), 51_200);
        assert_eq!(info.free_bytes(), 20_480);
        assert_eq!(info.used_bytes(), 30_720);
        assert_eq!(format!("{:.2}", info.usage_percent()), "60.00");
        assert_eq!(
            info.rtc,
            NaiveDate::from_ymd_opt(2023, 6, 1)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_device_info_uses_current_century() {
        let info = parse_device_info("1 100 40 512 23-06-01-12-30-00$OK").unwrap();
        assert_eq!(info.rtc.year() / 100, Local::now().year() / 100);
        assert_eq!(info.rtc.year() % 100, 23);
    }

    #[test]
    fn test_device_info_tolerates_echo_prefix() {
        let info =
            parse_device_info_in_century("$LOAD-INFO 65535 8 8 4096 24-12-31-23-59-59$OK", 20)
                .unwrap();
        assert_eq!(info.device_id, 65535);
        assert!(info.has_reserved_id());
        assert_eq!(info.usage_percent(), 0.0);
    }

    #[test]
    fn test_device_info_rejects_bad_frames() {
        assert_eq!(
            parse_device_info_in_century("1 100 40 512 23-06-01-12-30-00", 20),
            Err(FrameError::MissingTerminator { token: "$OK" })
        );
        assert_eq!(
            parse_device_info_in_century("1 100 40 23-06-01-12-30-00$OK", 20),
            Err(FrameError::FieldCount {
                expected: 5,
                found: 4
            })
        );
        assert!(parse_device_info_in_century("1 100 40 512 23-06-01 12-30-00$OK", 20).is_err());
        assert!(parse_device_info_in_century("x 100 40 512 23-06-01-12-30-00$OK", 20).is_err());
        assert!(parse_device_info_in_century("1 100 40 512 23-13-01-12-30-00$OK", 20).is_err());
        assert!(parse_device_info_in_century("1 100 40 512 23-06-01-12-30-0$OK", 20).is_err());
    }

    #[test]
    fn test_zero_sector_device() {
        let info = parse_device_info_in_century("3 0 0 512 23-06-01-12-30-00$OK", 20).unwrap();
        assert_eq!(info.usage_percent(), 0.0);
    }

    #[test]
    fn test_file_list() {
        let entries =
            parse_file_list("$FILE-ENTRY 120 230601.log$FILE-ENTRY 0 230602.log$OK").unwrap();
        assert_eq!(
            entries,
            vec![
                FileEntry {
                    name: "230601.log".into(),
                    size_bytes: 120
                },
                FileEntry {
                    name: "230602.log".into(),
                    size_bytes: 0
                },
            ]
        );
    }

    #[test]
    fn test_file_list_no_files_marker() {
        assert_eq!(parse_file_list("$FILE-ENTRY 0 none$OK").unwrap(), vec![]);
        assert_eq!(parse_file_list("$FILE-ENTRY 0$OK").unwrap(), vec![]);
        assert_eq!(parse_file_list("$OK").unwrap(), vec![]);
    }

    #[test]
    fn test_file_list_rejects_corruption() {
        // missing terminator
        assert!(matches!(
            parse_file_list("$FILE-ENTRY 1 a.log"),
            Err(FrameError::MissingTerminator { .. })
        ));
        // leading garbage
        assert!(parse_file_list("junk$FILE-ENTRY 1 a.log$OK").is_err());
        // one bad entry spoils the list
        assert!(matches!(
            parse_file_list("$FILE-ENTRY 1 a.log$FILE-ENTRY 2$OK"),
            Err(FrameError::BadEntry { index: 1, .. })
        ));
        assert!(parse_file_list("$FILE-ENTRY 1 a.log$FILE-START 2 b.log$OK").is_err());
        assert!(parse_file_list("$FILE-ENTRY x a.log$OK").is_err());
        assert!(parse_file_list("$FILE-ENTRY 1 a.log$ERROR").is_err());
    }

    #[test]
    fn test_bulk_files() {
        let mut buf = entry_frame("a.log", b"hello");
        buf.extend(entry_frame("b.log", b"$OK$FILE-ENTRY 3 x "));
        buf.extend_from_slice(b"$OK");

        let blobs = parse_bulk_files(&buf).unwrap();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].name, "a.log");
        assert_eq!(blobs[0].content, b"hello");
        assert_eq!(blobs[1].name, "b.log");
        assert_eq!(blobs[1].size_bytes, 19);
        assert_eq!(blobs[1].content, b"$OK$FILE-ENTRY 3 x ");
    }

    #[test]
    fn test_bulk_files_empty() {
        assert_eq!(parse_bulk_files(b"$OK").unwrap(), vec![]);
    }

    #[test]
    fn test_bulk_files_rejects_truncation() {
        let mut buf = entry_frame("a.log", b"hello");
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            parse_bulk_files(&buf),
            Err(FrameError::Truncated { .. })
        ));

        let buf = entry_frame("a.log", b"hello");
        assert_eq!(
            parse_bulk_files(&buf),
            Err(FrameError::MissingTerminator { token: "$OK" })
        );
        assert!(parse_bulk_files(b"$FILE-ENTRY 12x a.log abc$OK").is_err());
    }

    #[test]
    fn test_single_file() {
        let name = FileName::new("a.log").unwrap();
        let blob = parse_single_file(b"$FILE-START 4 a$b\x00$FILE-END", &name).unwrap();
        assert_eq!(blob.name, "a.log");
        assert_eq!(blob.size_bytes, 4);
        assert_eq!(blob.content, b"a$b\x00");
    }

    #[test]
    fn test_single_file_rejects_bad_frames() {
        let name = FileName::new("a.log").unwrap();
        assert!(matches!(
            parse_single_file(b" $FILE-START 1 x$FILE-END", &name),
            Err(FrameError::MissingSentinel { .. })
        ));
        assert!(matches!(
            parse_single_file(b"$FILE-START 10 short$FILE-END", &name),
            Err(FrameError::Truncated { .. }) | Err(FrameError::MissingTerminator { .. })
        ));
        assert!(matches!(
            parse_single_file(b"$FILE-START 1 x", &name),
            Err(FrameError::MissingTerminator { .. })
        ));
    }

    #[test]
    fn test_bulk_files_rejects_error_sentinel() {
        assert_eq!(
            parse_bulk_files(b"$ERROR$OK"),
            Err(FrameError::DeviceError { offset: 0 })
        );
        assert_eq!(
            parse_bulk_files(b"$FILE-ENTRY 1 a.log x$ERROR$OK"),
            Err(FrameError::DeviceError { offset: 21 })
        );

        // between two entries
        let mut buf = entry_frame("a.log", b"x");
        buf.extend_from_slice(b"$ERROR");
        buf.extend(entry_frame("b.log", b"y"));
        buf.extend_from_slice(b"$OK");
        assert!(matches!(
            parse_bulk_files(&buf),
            Err(FrameError::DeviceError { .. })
        ));

        // inside content it is just data
        let mut buf = entry_frame("a.log", b"$ERROR");
        buf.extend_from_slice(b"$OK");
        assert_eq!(parse_bulk_files(&buf).unwrap()[0].content, b"$ERROR");
    }

    #[test]
    fn test_single_file_rejects_error_sentinel() {
        let name = FileName::new("a.log").unwrap();
        assert_eq!(
            parse_single_file(b"$FILE-START 1 x$ERROR$FILE-END", &name),
            Err(FrameError::DeviceError { offset: 15 })
        );
        let blob = parse_single_file(b"$FILE-START 6 $ERROR$FILE-END", &name).unwrap();
        assert_eq!(blob.content, b"$ERROR");
    }
}
