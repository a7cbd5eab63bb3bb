//! Client side of the SOCKS5 CONNECT handshake.
//!
//! [`connect`] opens a TCP link to a SOCKS5 proxy, negotiates "no
//! authentication", asks the proxy to relay to a target host and port, and
//! hands back the stream positioned at the first byte of application data.

pub mod common;
pub mod net;
pub mod proxy;

pub use net::conn::Connection;
pub use net::dial::{Dialer, ProxyEndpoint, TcpDialer};
pub use proxy::address::{BoundAddress, TargetAddress, ToTargetAddr};
pub use proxy::connector::{
    connect, connect_async, connect_with, Connector, DirectConnector, HandshakeConfig,
    Socks5Connector, DEFAULT_PROXY_TIMEOUT,
};
pub use proxy::error::{ConnectReason, HandshakeError, Phase};
