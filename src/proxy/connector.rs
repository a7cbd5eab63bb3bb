use log::{debug, info, trace, warn};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::net::conn::Connection;
use crate::net::dial::{dial_async, Dialer, ProxyEndpoint, TcpDialer};
use crate::proxy::address::{TargetAddress, ToTargetAddr};
use crate::proxy::error::HandshakeError;
use crate::proxy::socks5::{advance, advance_async, HandshakeState};
use tokio::io::AsyncWriteExt;

/// Dial timeout for the proxy connection when none is configured.
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for one handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub proxy_timeout: Option<Duration>,
    pub proxy_source_address: Option<SocketAddr>,
    /// Read/write timeout applied to the stream once it is ready. When unset
    /// the stream keeps the proxy timeout.
    pub post_handshake_timeout: Option<Duration>,
}

impl HandshakeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proxy_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_timeout = Some(timeout);
        self
    }

    pub fn proxy_source_address(mut self, addr: SocketAddr) -> Self {
        self.proxy_source_address = Some(addr);
        self
    }

    pub fn post_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.post_handshake_timeout = Some(timeout);
        self
    }

    pub fn effective_proxy_timeout(&self) -> Duration {
        self.proxy_timeout.unwrap_or(DEFAULT_PROXY_TIMEOUT)
    }
}

/// Opens a TCP stream to `target` relayed through the SOCKS5 proxy at `proxy`.
pub fn connect<T: ToTargetAddr + ?Sized>(
    target: &T,
    proxy: &ProxyEndpoint,
    config: &HandshakeConfig,
) -> Result<TcpStream, HandshakeError> {
    connect_with(&TcpDialer, target, proxy, config)
}

/// Like [`connect`], opening the proxy link through `dialer`.
pub fn connect_with<D, T>(
    dialer: &D,
    target: &T,
    proxy: &ProxyEndpoint,
    config: &HandshakeConfig,
) -> Result<D::Stream, HandshakeError>
where
    D: Dialer + ?Sized,
    T: ToTargetAddr + ?Sized,
{
    let target = target.to_target_addr()?;
    let mut state = HandshakeState::Init;

    let mut stream = match dialer.dial(
        proxy,
        Some(config.effective_proxy_timeout()),
        config.proxy_source_address,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Dialing SOCKS5 proxy {} for {} failed in state {}: {}", proxy, target, state, e);
            return Err(e.into());
        }
    };
    state = HandshakeState::Dialed;
    trace!("Proxy {} dialed for {}, state {}", proxy, target, state);

    if let Err(e) = negotiate(&mut stream, &target, config, &mut state) {
        warn!(
            "SOCKS5 handshake with {} for {} failed after state {}: {}",
            proxy, target, state, e
        );
        stream.close();
        return Err(e);
    }

    info!("Connected to {} through SOCKS5 proxy {}", target, proxy);
    Ok(stream)
}

fn negotiate<S: Connection>(
    stream: &mut S,
    target: &TargetAddress,
    config: &HandshakeConfig,
    state: &mut HandshakeState,
) -> Result<(), HandshakeError> {
    stream.set_keepalive()?;
    advance(stream, target, state)?;
    if let Some(timeout) = config.post_handshake_timeout {
        stream.set_timeout(Some(timeout))?;
    }
    Ok(())
}

/// Async counterpart of [`connect`]. The proxy timeout bounds dialing and the
/// whole handshake. `post_handshake_timeout` is not applied: tokio streams
/// carry no deadline, callers wrap their own I/O in `tokio::time::timeout`.
pub async fn connect_async<T: ToTargetAddr + ?Sized>(
    target: &T,
    proxy: &ProxyEndpoint,
    config: &HandshakeConfig,
) -> Result<tokio::net::TcpStream, HandshakeError> {
    let target = target.to_target_addr()?;
    let timeout = config.effective_proxy_timeout();
    let mut state = HandshakeState::Init;

    let mut stream = match dial_async(proxy, Some(timeout), config.proxy_source_address).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Dialing SOCKS5 proxy {} for {} failed in state {}: {}", proxy, target, state, e);
            return Err(e.into());
        }
    };
    state = HandshakeState::Dialed;
    trace!("Proxy {} dialed for {}, state {}", proxy, target, state);

    let result = match socket2::SockRef::from(&stream).set_keepalive(true) {
        Ok(()) => match tokio::time::timeout(timeout, advance_async(&mut stream, &target, &mut state)).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "SOCKS5 handshake timed out",
            ))),
        },
        Err(e) => Err(HandshakeError::Io(e)),
    };
    if let Err(e) = result {
        warn!(
            "SOCKS5 handshake with {} for {} failed after state {}: {}",
            proxy, target, state, e
        );
        let _ = stream.shutdown().await;
        return Err(e);
    }

    if config.post_handshake_timeout.is_some() {
        debug!("post_handshake_timeout is not applied to async streams");
    }
    info!("Connected to {} through SOCKS5 proxy {}", target, proxy);
    Ok(stream)
}

/// Opens streams to a host and port. Code that may or may not go through a
/// proxy takes a `Connector` instead of dialing directly.
pub trait Connector {
    type Stream: Connection;

    fn connect_to(&self, host: &str, port: u16) -> Result<Self::Stream, HandshakeError>;
}

/// Connects straight to the target, no proxy involved.
#[derive(Debug, Clone, Default)]
pub struct DirectConnector {
    pub timeout: Option<Duration>,
    pub source_address: Option<SocketAddr>,
}

impl Connector for DirectConnector {
    type Stream = TcpStream;

    fn connect_to(&self, host: &str, port: u16) -> Result<TcpStream, HandshakeError> {
        let endpoint = ProxyEndpoint::new(host, port);
        Ok(TcpDialer.dial(&endpoint, self.timeout, self.source_address)?)
    }
}

/// Connects through a SOCKS5 proxy.
#[derive(Debug, Clone)]
pub struct Socks5Connector<D = TcpDialer> {
    proxy: ProxyEndpoint,
    config: HandshakeConfig,
    dialer: D,
}

impl Socks5Connector<TcpDialer> {
    pub fn new(proxy: ProxyEndpoint, config: HandshakeConfig) -> Self {
        Socks5Connector {
            proxy,
            config,
            dialer: TcpDialer,
        }
    }
}

impl<D: Dialer> Socks5Connector<D> {
    pub fn with_dialer(proxy: ProxyEndpoint, config: HandshakeConfig, dialer: D) -> Self {
        Socks5Connector {
            proxy,
            config,
            dialer,
        }
    }

    pub fn proxy(&self) -> &ProxyEndpoint {
        &self.proxy
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }
}

impl<D: Dialer> Connector for Socks5Connector<D> {
    type Stream = D::Stream;

    fn connect_to(&self, host: &str, port: u16) -> Result<D::Stream, HandshakeError> {
        connect_with(&self.dialer, &(host, port), &self.proxy, &self.config)
    }
}
