use log::{debug, trace};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::common::utils;
use crate::net::conn::Connection;

/// Address of the SOCKS5 proxy itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    host: String,
    port: u16,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ProxyEndpoint {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for ProxyEndpoint {
    fn from(addr: SocketAddr) -> Self {
        ProxyEndpoint::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid proxy address: {0}")]
pub struct ParseEndpointError(String);

impl FromStr for ProxyEndpoint {
    type Err = ParseEndpointError;

    /// Accepts `host:port`, `[v6]:port`, `socks5://host:port` and `socks5h://host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains("://") {
            let url = url::Url::parse(s).map_err(|e| ParseEndpointError(format!("{}: {}", s, e)))?;
            if url.scheme() != "socks5" && url.scheme() != "socks5h" {
                return Err(ParseEndpointError(format!(
                    "unsupported scheme '{}'",
                    url.scheme()
                )));
            }
            let host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| ParseEndpointError(format!("{}: missing host", s)))?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            let port = url.port().unwrap_or(1080);
            return Ok(ProxyEndpoint::new(host, port));
        }

        let (host, port) = split_host_port(s).ok_or_else(|| ParseEndpointError(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseEndpointError(format!("{}: bad port '{}'", s, port)))?;
        if host.is_empty() {
            return Err(ParseEndpointError(format!("{}: missing host", s)));
        }
        Ok(ProxyEndpoint::new(host, port))
    }
}

/// Splits `host:port` or `[v6]:port` at the last colon.
pub(crate) fn split_host_port(s: &str) -> Option<(&str, &str)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = s.rsplit_once(':')?;
    if host.contains(':') {
        // bare IPv6 literal without brackets
        return None;
    }
    Some((host, port))
}

/// Opens the byte stream to the proxy.
pub trait Dialer {
    type Stream: Connection;

    fn dial(
        &self,
        endpoint: &ProxyEndpoint,
        timeout: Option<Duration>,
        source_address: Option<SocketAddr>,
    ) -> io::Result<Self::Stream>;
}

/// Plain TCP dialer, trying every resolved address of the proxy in turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl TcpDialer {
    fn candidates(
        endpoint: &ProxyEndpoint,
        source_address: Option<SocketAddr>,
    ) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (endpoint.host(), endpoint.port())
            .to_socket_addrs()?
            .filter(|addr| match source_address {
                Some(src) => src.is_ipv4() == addr.is_ipv4(),
                None => true,
            })
            .collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no usable address for proxy {}", endpoint),
            ));
        }
        Ok(addrs)
    }

    fn connect_one(
        addr: SocketAddr,
        timeout: Option<Duration>,
        source_address: Option<SocketAddr>,
    ) -> io::Result<TcpStream> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        if let Some(src) = source_address {
            socket.bind(&SockAddr::from(src))?;
        }
        let peer = SockAddr::from(addr);
        match timeout {
            Some(timeout) => socket.connect_timeout(&peer, timeout)?,
            None => socket.connect(&peer)?,
        }
        let stream = TcpStream::from(socket);
        // the dial timeout also bounds every handshake read and write
        utils::set_stream_timeout(&stream, timeout)?;
        Ok(stream)
    }
}

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    fn dial(
        &self,
        endpoint: &ProxyEndpoint,
        timeout: Option<Duration>,
        source_address: Option<SocketAddr>,
    ) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in Self::candidates(endpoint, source_address)? {
            match Self::connect_one(addr, timeout, source_address) {
                Ok(stream) => {
                    debug!("Connected to proxy {} ({})", endpoint, addr);
                    return Ok(stream);
                }
                Err(e) => {
                    trace!("Proxy address {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no proxy address tried")
        }))
    }
}

/// Async counterpart of [`TcpDialer::dial`].
pub async fn dial_async(
    endpoint: &ProxyEndpoint,
    timeout: Option<Duration>,
    source_address: Option<SocketAddr>,
) -> io::Result<tokio::net::TcpStream> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((endpoint.host(), endpoint.port()))
        .await?
        .filter(|addr| match source_address {
            Some(src) => src.is_ipv4() == addr.is_ipv4(),
            None => true,
        })
        .collect();

    let mut last_err = None;
    for addr in addrs {
        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()?
        } else {
            tokio::net::TcpSocket::new_v6()?
        };
        if let Some(src) = source_address {
            socket.bind(src)?;
        }
        let attempt = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, socket.connect(addr)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to proxy {} timed out", addr),
                )),
            },
            None => socket.connect(addr).await,
        };
        match attempt {
            Ok(stream) => {
                debug!("Connected to proxy {} ({})", endpoint, addr);
                return Ok(stream);
            }
            Err(e) => {
                trace!("Proxy address {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no usable address for proxy {}", endpoint),
        )
    }))
}
