use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::common::utils;
use crate::proxy::error::{ConnectReason, HandshakeError};

/// Bidirectional byte stream the handshake runs over.
pub trait Connection: Read + Write {
    /// Applies `timeout` to both directions. `None` means block forever.
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_keepalive(&self) -> io::Result<()>;

    /// Closes both halves, ignoring streams that are already gone.
    fn close(&self) {}
}

impl Connection for TcpStream {
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        utils::set_stream_timeout(self, timeout)
    }

    fn set_keepalive(&self) -> io::Result<()> {
        utils::enable_keepalive(self)
    }

    fn close(&self) {
        let _ = self.shutdown(std::net::Shutdown::Both);
    }
}

/// Fills `buf` completely from `stream`.
///
/// A zero-length read means the proxy closed its side before the message was
/// complete and ends the handshake.
pub fn read_exact_into<R: Read + ?Sized>(
    stream: &mut R,
    buf: &mut [u8],
) -> Result<(), HandshakeError> {
    let mut bytes_read = 0;
    while bytes_read < buf.len() {
        match stream.read(&mut buf[bytes_read..]) {
            Ok(0) => return Err(HandshakeError::Connect(ConnectReason::ClosedByProxy)),
            Ok(n) => bytes_read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HandshakeError::Io(e)),
        }
    }
    Ok(())
}

pub async fn read_exact_into_async<R: AsyncRead + Unpin + ?Sized>(
    stream: &mut R,
    buf: &mut [u8],
) -> Result<(), HandshakeError> {
    let mut bytes_read = 0;
    while bytes_read < buf.len() {
        match stream.read(&mut buf[bytes_read..]).await {
            Ok(0) => return Err(HandshakeError::Connect(ConnectReason::ClosedByProxy)),
            Ok(n) => bytes_read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HandshakeError::Io(e)),
        }
    }
    Ok(())
}
