//! Shared socket helpers for probes

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::net::TcpStream;

use crate::error::ProbeError;

/// Longest line we are willing to buffer from an untrusted peer
pub const MAX_LINE_LEN: u64 = 4096;

/// Open a TCP connection within `timeout`
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ProbeError> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true).ok();
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProbeError::from_io(e, timeout)),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Read one CRLF/LF terminated line, capped at [`MAX_LINE_LEN`] bytes.
///
/// Returns the line without its terminator. EOF before any byte is a
/// protocol mismatch: the peer accepted and hung up.
pub async fn read_line<R>(reader: &mut R, timeout: Duration) -> Result<String, ProbeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = reader
        .take(MAX_LINE_LEN)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| ProbeError::from_io(e, timeout))?;

    if read == 0 {
        return Err(ProbeError::ProtocolMismatch("connection closed before greeting".to_string()));
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
