//! In-memory ZIP archive of downloaded log files.

use crate::protocol::FileBlob;
use std::io::{Cursor, Write};
use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to build archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to write archive entry: {0}")]
    Io(#[from] std::io::Error),
}

/// Pack `blobs` into a deflated ZIP, one entry per blob in order.
///
/// Returns `None` when there is nothing to pack.
pub fn archive(blobs: &[FileBlob]) -> Result<Option<Vec<u8>>, BundleError> {
    if blobs.is_empty() {
        return Ok(None);
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for blob in blobs {
        writer.start_file(blob.name.as_str(), options)?;
        writer.write_all(&blob.content)?;
    }
    let bytes = writer.finish()?.into_inner();

    debug!(files = blobs.len(), bytes = bytes.len(), "archive built");
    Ok(Some(bytes))
}
