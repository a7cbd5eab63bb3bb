use socket2::SockRef;
use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// Set read and write timeout for TCP connection
pub fn set_stream_timeout(stream: &TcpStream, timeout: Option<Duration>) -> io::Result<()> {
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;
    Ok(())
}

/// Turn on SO_KEEPALIVE for TCP connection
pub fn enable_keepalive(stream: &TcpStream) -> io::Result<()> {
    SockRef::from(stream).set_keepalive(true)
}

/// Parse a timeout given in (fractional) seconds
pub fn duration_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
}
