use std::fmt;
use std::net::{SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use crate::net::dial::split_host_port;
use crate::proxy::error::HandshakeError;

/// Longest hostname the one byte DOMAINLEN field can describe.
pub const MAX_HOSTNAME_LEN: usize = 255;

/// Destination the proxy is asked to relay to. The hostname is forwarded
/// unresolved, literal IP strings included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    hostname: String,
    port: u16,
}

impl TargetAddress {
    pub fn new(hostname: impl Into<String>, port: u16) -> Result<Self, HandshakeError> {
        let hostname = hostname.into();
        if hostname.is_empty() {
            return Err(HandshakeError::argument("hostname must not be empty"));
        }
        if hostname.len() > MAX_HOSTNAME_LEN {
            return Err(HandshakeError::argument(format!(
                "hostname is {} bytes long, at most {} allowed",
                hostname.len(),
                MAX_HOSTNAME_LEN
            )));
        }
        Ok(TargetAddress { hostname, port })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hostname.contains(':') {
            write!(f, "[{}]:{}", self.hostname, self.port)
        } else {
            write!(f, "{}:{}", self.hostname, self.port)
        }
    }
}

impl FromStr for TargetAddress {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = split_host_port(s).ok_or_else(|| {
            HandshakeError::argument(format!("'{}' is not of the form host:port", s))
        })?;
        let port = port
            .parse::<u16>()
            .map_err(|_| HandshakeError::argument(format!("'{}' is not a valid port", port)))?;
        TargetAddress::new(host, port)
    }
}

/// Conversion into a validated [`TargetAddress`], performed once by `connect`.
pub trait ToTargetAddr {
    fn to_target_addr(&self) -> Result<TargetAddress, HandshakeError>;
}

impl ToTargetAddr for TargetAddress {
    fn to_target_addr(&self) -> Result<TargetAddress, HandshakeError> {
        Ok(self.clone())
    }
}

impl ToTargetAddr for (&str, u16) {
    fn to_target_addr(&self) -> Result<TargetAddress, HandshakeError> {
        TargetAddress::new(self.0, self.1)
    }
}

impl ToTargetAddr for (String, u16) {
    fn to_target_addr(&self) -> Result<TargetAddress, HandshakeError> {
        TargetAddress::new(self.0.as_str(), self.1)
    }
}

impl ToTargetAddr for str {
    fn to_target_addr(&self) -> Result<TargetAddress, HandshakeError> {
        self.parse()
    }
}

impl ToTargetAddr for String {
    fn to_target_addr(&self) -> Result<TargetAddress, HandshakeError> {
        self.parse()
    }
}

impl<T: ToTargetAddr + ?Sized> ToTargetAddr for &T {
    fn to_target_addr(&self) -> Result<TargetAddress, HandshakeError> {
        (**self).to_target_addr()
    }
}

/// BND.ADDR and BND.PORT of a CONNECT reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddress {
    Ipv4(SocketAddrV4),
    Domain(String, u16),
    Ipv6(SocketAddrV6),
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundAddress::Ipv4(addr) => write!(f, "{}", addr),
            BoundAddress::Domain(domain, port) => write!(f, "{}:{}", domain, port),
            BoundAddress::Ipv6(addr) => write!(f, "{}", addr),
        }
    }
}
