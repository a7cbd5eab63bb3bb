use std::borrow::Cow;
use std::fmt;
use std::io;
use thiserror::Error;

/// Handshake phase a protocol violation was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Greeting,
    Command,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Greeting => f.write_str("greeting phase"),
            Phase::Command => f.write_str("command phase"),
        }
    }
}

/// Why the proxy did not establish the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReason {
    /// Non-zero REP field of the CONNECT reply.
    Rejected(u8),
    /// The proxy closed the stream before a complete message arrived.
    ClosedByProxy,
}

impl ConnectReason {
    /// Human readable reason, following RFC 1928 §6 for known reply codes.
    pub fn describe(&self) -> Cow<'static, str> {
        let code = match self {
            ConnectReason::ClosedByProxy => return Cow::Borrowed("connection closed by proxy"),
            ConnectReason::Rejected(code) => *code,
        };
        match code {
            0x01 => Cow::Borrowed("general failure"),
            0x02 => Cow::Borrowed("connection not allowed by ruleset"),
            0x03 => Cow::Borrowed("network unreachable"),
            0x04 => Cow::Borrowed("host unreachable"),
            0x05 => Cow::Borrowed("connection refused by destination host"),
            0x06 => Cow::Borrowed("TTL expired"),
            0x07 => Cow::Borrowed("command not supported / protocol error"),
            0x08 => Cow::Borrowed("address type not supported"),
            other => Cow::Owned(format!("{:#x}", other)),
        }
    }
}

impl fmt::Display for ConnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Malformed target supplied by the caller. Raised before any I/O.
    #[error("invalid target address: {0}")]
    Argument(String),
    #[error("invalid socks-proxy format ({0})")]
    Format(Phase),
    #[error("invalid socks-proxy authorization (greeting phase)")]
    Auth,
    #[error("socks-proxy can not create connection: {0}")]
    Connect(ConnectReason),
    /// Transport failure, including dial errors and expired timeouts.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl HandshakeError {
    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        HandshakeError::Argument(msg.into())
    }

    /// Reason carried by a `Connect` error.
    pub fn connect_reason(&self) -> Option<ConnectReason> {
        match self {
            HandshakeError::Connect(reason) => Some(*reason),
            _ => None,
        }
    }
}
