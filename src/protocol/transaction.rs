//! The transaction engine: one query out, one sentinel-terminated response in.

use super::resp;
use super::response::Response;
use crate::error::{ClientError, ClientResult};
use crate::port::PortError;
use crate::session::Session;
use memchr::memmem;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

/// Read buffer size. Larger than anything the device sends in one USB packet.
const READ_CHUNK: usize = 4096;

/// Send `query` and collect the response until `terminator` or `$ERROR`
/// appears.
///
/// `idle_timeout` bounds every individual write and read: a transfer that
/// keeps producing bytes may run longer than `idle_timeout` in total.
///
/// # Errors
///
/// - `InvalidArgument` if `query` is not ASCII (nothing is sent)
/// - `NotConnected` if the link is already down
/// - `WriteFailed` if the query could not be written
/// - `ReadFailed` if the port errors, reaches end-of-data or disconnects
///   before the terminator
/// - `Timeout` if no byte arrives within `idle_timeout`
/// - `DeviceError` if the device answered `$ERROR`
pub async fn transceive(
    session: &mut Session,
    query: &str,
    terminator: &'static str,
    idle_timeout: Duration,
) -> ClientResult<Response> {
    if !query.is_ascii() {
        return Err(ClientError::invalid(format!("query `{query}` is not ASCII")));
    }
    if !session.is_open() {
        return Err(ClientError::NotConnected);
    }

    let started = Instant::now();
    debug!(query, terminator, timeout_ms = idle_timeout.as_millis() as u64, "sending query");

    write_all(session, query.as_bytes(), idle_timeout)
        .await
        .map_err(|source| ClientError::WriteFailed {
            query: query.to_owned(),
            source,
        })?;

    let bytes = read_until(session, query, terminator, idle_timeout).await?;

    session.record_transaction();
    let response = Response::new(bytes, started.elapsed());
    info!(
        query,
        bytes = response.len(),
        elapsed_ms = response.elapsed.as_millis() as u64,
        bytes_per_second = response.bytes_per_second(),
        "transaction complete"
    );
    Ok(response)
}

async fn write_all(session: &mut Session, data: &[u8], idle_timeout: Duration) -> Result<(), PortError> {
    let mut written = 0;
    while written < data.len() {
        let n = timeout(idle_timeout, session.port_mut().write_bytes(&data[written..]))
            .await
            .map_err(|_| PortError::timeout(idle_timeout))??;
        if n == 0 {
            return Err(PortError::Io(std::io::ErrorKind::WriteZero.into()));
        }
        session.record_write(n);
        written += n;
    }
    Ok(())
}

async fn read_until(
    session: &mut Session,
    query: &str,
    terminator: &'static str,
    idle_timeout: Duration,
) -> ClientResult<Vec<u8>> {
    let terminator = terminator.as_bytes();
    let error = resp::ERROR.as_bytes();
    // A sentinel may straddle two reads; re-scan this many trailing bytes.
    let overlap = terminator.len().max(error.len()) - 1;

    let mut link = session.link();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut bytes = Vec::new();

    loop {
        let read = tokio::select! {
            biased;
            () = link.lost() => Err(PortError::Disconnected),
            read = timeout(idle_timeout, session.port_mut().read_bytes(&mut chunk)) => match read {
                Ok(result) => result,
                Err(_) => {
                    warn!(query, received = bytes.len(), "response timed out");
                    return Err(ClientError::Timeout {
                        query: query.to_owned(),
                        timeout: idle_timeout,
                        response: lossy(&bytes),
                    });
                }
            },
        };

        let n = match read {
            Ok(0) => Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended before the terminator",
            ))),
            other => other,
        }
        .map_err(|source| {
            warn!(query, error = %source, "response read failed");
            ClientError::ReadFailed {
                query: query.to_owned(),
                response: lossy(&bytes),
                source,
            }
        })?;

        session.record_read(n);
        let window_start = bytes.len().saturating_sub(overlap);
        bytes.extend_from_slice(&chunk[..n]);
        trace!(bytes = n, total = bytes.len(), "received chunk");

        let window = &bytes[window_start..];
        if memmem::find(window, error).is_some() {
            let response = lossy(&bytes);
            warn!(query, response = %response, "device reported an error");
            return Err(ClientError::DeviceError {
                query: query.to_owned(),
                response,
            });
        }
        if memmem::find(window, terminator).is_some() {
            debug!(query, total = bytes.len(), "terminator received");
            return Ok(bytes);
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
