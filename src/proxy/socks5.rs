use log::{debug, trace};
use std::fmt;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::net::conn::{read_exact_into, read_exact_into_async};
use crate::proxy::address::{BoundAddress, TargetAddress};
use crate::proxy::error::{ConnectReason, HandshakeError, Phase};

pub const SOCKS_VERSION: u8 = 0x05;
pub const METHOD_NO_AUTH: u8 = 0x00;
pub const CMD_CONNECT: u8 = 0x01;
pub const RESERVED: u8 = 0x00;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// SOCKS5 reply codes (RFC 1928 §6)
pub const REPLY_SUCCEEDED: u8 = 0x00;

/// Progress of one handshake. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakeState {
    Init,
    Dialed,
    Greeted,
    CommandAcked,
    Ready,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Init => "init",
            HandshakeState::Dialed => "dialed",
            HandshakeState::Greeted => "greeted",
            HandshakeState::CommandAcked => "command-acked",
            HandshakeState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Length of the BND.ADDR field that follows an ATYP byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrLen {
    Fixed(usize),
    /// One length byte, then that many bytes.
    Prefixed,
}

/// VER, NMETHODS, METHODS
pub fn greeting_request() -> [u8; 3] {
    [SOCKS_VERSION, 0x01, METHOD_NO_AUTH]
}

pub fn check_method_selection(reply: [u8; 2]) -> Result<(), HandshakeError> {
    let [version, method] = reply;
    if version != SOCKS_VERSION {
        return Err(HandshakeError::Format(Phase::Greeting));
    }
    if method != METHOD_NO_AUTH {
        return Err(HandshakeError::Auth);
    }
    Ok(())
}

/// +----+-----+-------+------+-----------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DOMAINLEN |  DOMAIN  |   PORT   |
/// +----+-----+-------+------+-----------+----------+----------+
/// | 1  |  1  | X'00' | X'03'|     1     | Variable |    2     |
/// +----+-----+-------+------+-----------+----------+----------+
pub fn connect_request(target: &TargetAddress) -> Vec<u8> {
    let host = target.hostname().as_bytes();
    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[
        SOCKS_VERSION,
        CMD_CONNECT,
        RESERVED,
        ATYP_DOMAIN,
        // TargetAddress::new caps the hostname at 255 bytes
        host.len() as u8,
    ]);
    request.extend_from_slice(host);
    request.extend_from_slice(&target.port().to_be_bytes());
    request
}

pub fn check_reply_header(reply: [u8; 2]) -> Result<(), HandshakeError> {
    let [version, status] = reply;
    if version != SOCKS_VERSION {
        return Err(HandshakeError::Format(Phase::Command));
    }
    if status != REPLY_SUCCEEDED {
        return Err(HandshakeError::Connect(ConnectReason::Rejected(status)));
    }
    Ok(())
}

pub fn bound_address_len(atyp: u8) -> Result<AddrLen, HandshakeError> {
    match atyp {
        ATYP_IPV4 => Ok(AddrLen::Fixed(4)),
        ATYP_DOMAIN => Ok(AddrLen::Prefixed),
        ATYP_IPV6 => Ok(AddrLen::Fixed(16)),
        _ => Err(HandshakeError::Format(Phase::Command)),
    }
}

/// `addr` is BND.ADDR without the length prefix of a domain.
pub fn decode_bound_address(atyp: u8, addr: &[u8], port: [u8; 2]) -> BoundAddress {
    let port = u16::from_be_bytes(port);
    match (atyp, addr.len()) {
        (ATYP_IPV4, 4) => {
            let ip = Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]);
            BoundAddress::Ipv4(SocketAddrV4::new(ip, port))
        }
        (ATYP_IPV6, 16) => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(addr);
            BoundAddress::Ipv6(SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0))
        }
        _ => BoundAddress::Domain(String::from_utf8_lossy(addr).into_owned(), port),
    }
}

pub fn greet<S: Read + Write + ?Sized>(stream: &mut S) -> Result<(), HandshakeError> {
    let request = greeting_request();
    trace!("-> greeting {:02x?}", request);
    stream.write_all(&request)?;

    let mut reply = [0u8; 2];
    read_exact_into(stream, &mut reply)?;
    trace!("<- method selection {:02x?}", reply);
    check_method_selection(reply)
}

pub fn request_connect<S: Read + Write + ?Sized>(
    stream: &mut S,
    target: &TargetAddress,
) -> Result<(), HandshakeError> {
    let request = connect_request(target);
    trace!("-> connect {:02x?}", request);
    stream.write_all(&request)?;

    let mut reply = [0u8; 2];
    read_exact_into(stream, &mut reply)?;
    trace!("<- reply {:02x?}", reply);
    check_reply_header(reply)
}

/// Consumes RSV, ATYP, BND.ADDR and BND.PORT so the stream is left at the
/// first byte of relayed data.
pub fn drain_bound_address<S: Read + ?Sized>(stream: &mut S) -> Result<BoundAddress, HandshakeError> {
    let mut header = [0u8; 2];
    read_exact_into(stream, &mut header)?;
    let atyp = header[1];

    let mut addr = match bound_address_len(atyp)? {
        AddrLen::Fixed(len) => vec![0u8; len],
        AddrLen::Prefixed => {
            let mut len = [0u8; 1];
            read_exact_into(stream, &mut len)?;
            vec![0u8; len[0] as usize]
        }
    };
    read_exact_into(stream, &mut addr)?;

    let mut port = [0u8; 2];
    read_exact_into(stream, &mut port)?;
    Ok(decode_bound_address(atyp, &addr, port))
}

/// Runs greeting, command and drain over an already dialed stream.
pub fn handshake<S: Read + Write + ?Sized>(
    stream: &mut S,
    target: &TargetAddress,
) -> Result<(), HandshakeError> {
    let mut state = HandshakeState::Dialed;
    let result = advance(stream, target, &mut state);
    match &result {
        Ok(()) => trace!("Handshake for {} reached state {}", target, state),
        Err(e) => debug!("Handshake for {} failed after state {}: {}", target, state, e),
    }
    result
}

/// Drives a dialed stream to `Ready`, recording in `state` the last state
/// reached so a caller can report where a failure happened.
pub fn advance<S: Read + Write + ?Sized>(
    stream: &mut S,
    target: &TargetAddress,
    state: &mut HandshakeState,
) -> Result<(), HandshakeError> {
    *state = HandshakeState::Dialed;
    greet(stream)?;
    *state = HandshakeState::Greeted;
    request_connect(stream, target)?;
    *state = HandshakeState::CommandAcked;
    let bound = drain_bound_address(stream)?;
    *state = HandshakeState::Ready;
    debug!("Proxy relaying to {} via bound address {}", target, bound);
    Ok(())
}

pub async fn greet_async<S>(stream: &mut S) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let request = greeting_request();
    trace!("-> greeting {:02x?}", request);
    stream.write_all(&request).await?;

    let mut reply = [0u8; 2];
    read_exact_into_async(stream, &mut reply).await?;
    trace!("<- method selection {:02x?}", reply);
    check_method_selection(reply)
}

pub async fn request_connect_async<S>(
    stream: &mut S,
    target: &TargetAddress,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let request = connect_request(target);
    trace!("-> connect {:02x?}", request);
    stream.write_all(&request).await?;

    let mut reply = [0u8; 2];
    read_exact_into_async(stream, &mut reply).await?;
    trace!("<- reply {:02x?}", reply);
    check_reply_header(reply)
}

pub async fn drain_bound_address_async<S>(stream: &mut S) -> Result<BoundAddress, HandshakeError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 2];
    read_exact_into_async(stream, &mut header).await?;
    let atyp = header[1];

    let mut addr = match bound_address_len(atyp)? {
        AddrLen::Fixed(len) => vec![0u8; len],
        AddrLen::Prefixed => {
            let mut len = [0u8; 1];
            read_exact_into_async(stream, &mut len).await?;
            vec![0u8; len[0] as usize]
        }
    };
    read_exact_into_async(stream, &mut addr).await?;

    let mut port = [0u8; 2];
    read_exact_into_async(stream, &mut port).await?;
    Ok(decode_bound_address(atyp, &addr, port))
}

pub async fn handshake_async<S>(stream: &mut S, target: &TargetAddress) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut state = HandshakeState::Dialed;
    let result = advance_async(stream, target, &mut state).await;
    match &result {
        Ok(()) => trace!("Handshake for {} reached state {}", target, state),
        Err(e) => debug!("Handshake for {} failed after state {}: {}", target, state, e),
    }
    result
}

pub async fn advance_async<S>(
    stream: &mut S,
    target: &TargetAddress,
    state: &mut HandshakeState,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    *state = HandshakeState::Dialed;
    greet_async(stream).await?;
    *state = HandshakeState::Greeted;
    request_connect_async(stream, target).await?;
    *state = HandshakeState::CommandAcked;
    let bound = drain_bound_address_async(stream).await?;
    *state = HandshakeState::Ready;
    debug!("Proxy relaying to {} via bound address {}", target, bound);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::ScriptedStream;

    const READY_REPLY: &[u8] = b"\x05\x00\x05\x00\x00\x01\x00\x00\x00\x00\x00\x00";

    fn target(host: &str, port: u16) -> TargetAddress {
        TargetAddress::new(host, port).unwrap()
    }

    #[test]
    fn test_greeting_request_bytes() {
        let mut stream = ScriptedStream::new(b"\x05\x00");
        greet(&mut stream).unwrap();
        assert_eq!(stream.written, b"\x05\x01\x00");
    }

    #[test]
    fn test_greeting_replies() {
        assert!(greet(&mut ScriptedStream::new(b"\x05\x00")).is_ok());
        assert!(matches!(
            greet(&mut ScriptedStream::new(b"\x04\x00")),
            Err(HandshakeError::Format(Phase::Greeting))
        ));
        assert!(matches!(
            greet(&mut ScriptedStream::new(b"\x05\x02")),
            Err(HandshakeError::Auth)
        ));
        assert!(matches!(
            greet(&mut ScriptedStream::new(b"\x05\xff")),
            Err(HandshakeError::Auth)
        ));
    }

    #[test]
    fn test_greeting_sent_before_reading() {
        let mut stream = ScriptedStream::new(b"\x05\x00");
        greet(&mut stream).unwrap();
        assert_eq!(stream.written_before_first_read, Some(3));
    }

    #[test]
    fn test_connect_request_layout() {
        let request = connect_request(&target("example.com", 443));
        let mut expected = vec![0x05, 0x01, 0x00, 0x03, 11];
        expected.extend_from_slice(b"example.com");
        expected.extend_from_slice(&[0x01, 0xbb]);
        assert_eq!(request, expected);
    }

    #[test]
    fn test_connect_request_length_for_all_host_sizes() {
        for len in [1usize, 2, 63, 127, 128, 254, 255] {
            for port in [0u16, 1, 80, 0x1234, 65535] {
                let host = "h".repeat(len);
                let request = connect_request(&target(&host, port));
                assert_eq!(request.len(), 7 + len);
                assert_eq!(request[4] as usize, len);
                assert_eq!(&request[5..5 + len], host.as_bytes());
                assert_eq!(&request[5 + len..], &port.to_be_bytes());
            }
        }
    }

    #[test]
    fn test_ip_literal_sent_as_domain() {
        let request = connect_request(&target("192.168.1.1", 80));
        assert_eq!(request[3], ATYP_DOMAIN);
        assert_eq!(&request[5..16], b"192.168.1.1");
    }

    #[test]
    fn test_command_replies() {
        let t = target("example.com", 80);
        assert!(request_connect(&mut ScriptedStream::new(b"\x05\x00"), &t).is_ok());

        let err = request_connect(&mut ScriptedStream::new(b"\x05\x05"), &t).unwrap_err();
        match err {
            HandshakeError::Connect(reason) => {
                assert_eq!(reason.describe(), "connection refused by destination host")
            }
            other => panic!("unexpected error: {}", other),
        }

        let err = request_connect(&mut ScriptedStream::new(b"\x05\xff"), &t).unwrap_err();
        assert_eq!(err.connect_reason(), Some(ConnectReason::Rejected(0xff)));
        assert_eq!(err.connect_reason().unwrap().describe(), "0xff");

        assert!(matches!(
            request_connect(&mut ScriptedStream::new(b"\x04\x00"), &t),
            Err(HandshakeError::Format(Phase::Command))
        ));
    }

    #[test]
    fn test_drain_ipv4() {
        let mut stream = ScriptedStream::new(b"\x00\x01\x0a\x00\x00\x01\x04\x38DATA");
        let bound = drain_bound_address(&mut stream).unwrap();
        assert_eq!(bound, BoundAddress::Ipv4("10.0.0.1:1080".parse().unwrap()));
        assert_eq!(stream.remaining(), 4);
    }

    #[test]
    fn test_drain_domain() {
        let mut input = vec![0x00, 0x03, 5];
        input.extend_from_slice(b"relay");
        input.extend_from_slice(&[0x00, 0x50]);
        input.extend_from_slice(b"DATA");
        let mut stream = ScriptedStream::new(&input);
        let bound = drain_bound_address(&mut stream).unwrap();
        assert_eq!(bound, BoundAddress::Domain("relay".to_string(), 80));
        assert_eq!(stream.remaining(), 4);
    }

    #[test]
    fn test_drain_empty_domain() {
        let mut stream = ScriptedStream::new(b"\x00\x03\x00\x00\x00");
        let bound = drain_bound_address(&mut stream).unwrap();
        assert_eq!(bound, BoundAddress::Domain(String::new(), 0));
        assert_eq!(stream.remaining(), 0);
    }

    #[test]
    fn test_drain_ipv6() {
        let mut input = vec![0x00, 0x04];
        input.extend_from_slice(&[0u8; 15]);
        input.push(1);
        input.extend_from_slice(&[0x1f, 0x90]);
        input.extend_from_slice(b"DATA");
        let mut stream = ScriptedStream::new(&input).fragment(3);
        let bound = drain_bound_address(&mut stream).unwrap();
        assert_eq!(bound, BoundAddress::Ipv6("[::1]:8080".parse().unwrap()));
        assert_eq!(stream.remaining(), 4);
    }

    #[test]
    fn test_drain_unknown_atyp_stops_after_header() {
        let mut stream = ScriptedStream::new(b"\x00\x02\x01\x02\x03\x04\x00\x00");
        assert!(matches!(
            drain_bound_address(&mut stream),
            Err(HandshakeError::Format(Phase::Command))
        ));
        assert_eq!(stream.remaining(), 6);
    }

    #[test]
    fn test_drain_truncated() {
        let mut stream = ScriptedStream::new(b"\x00\x01\x7f\x00");
        assert!(matches!(
            drain_bound_address(&mut stream),
            Err(HandshakeError::Connect(ConnectReason::ClosedByProxy))
        ));
    }

    #[test]
    fn test_handshake_full_sequence() {
        let reply = b"\x05\x00\x05\x00\x00\x01\x00\x00\x00\x00\x00\x00";
        let mut stream = ScriptedStream::new(reply).fragment(1);
        handshake(&mut stream, &target("example.com", 80)).unwrap();
        assert_eq!(stream.remaining(), 0);

        let mut expected = vec![0x05, 0x01, 0x00];
        expected.extend_from_slice(&connect_request(&target("example.com", 80)));
        assert_eq!(stream.written, expected);
    }

    #[test]
    fn test_handshake_stops_at_first_error() {
        let mut stream = ScriptedStream::new(b"\x05\x02\x05\x00");
        assert!(matches!(
            handshake(&mut stream, &target("example.com", 80)),
            Err(HandshakeError::Auth)
        ));
        assert_eq!(stream.written, b"\x05\x01\x00");
        assert_eq!(stream.remaining(), 2);
    }

    #[test]
    fn test_advance_records_failed_state() {
        let t = target("example.com", 80);
        let cases: [(&[u8], HandshakeState); 4] = [
            (&b"\x05\x02"[..], HandshakeState::Dialed),
            (&b"\x05\x00\x05\x01"[..], HandshakeState::Greeted),
            (&b"\x05\x00\x05\x00\x00\x07"[..], HandshakeState::CommandAcked),
            (READY_REPLY, HandshakeState::Ready),
        ];
        for (reply, expected) in cases {
            let mut state = HandshakeState::Init;
            let _ = advance(&mut ScriptedStream::new(reply), &t, &mut state);
            assert_eq!(state, expected, "reply {:02x?}", reply);
        }
    }

    #[test]
    fn test_state_order() {
        assert!(HandshakeState::Init < HandshakeState::Dialed);
        assert!(HandshakeState::Greeted < HandshakeState::CommandAcked);
        assert!(HandshakeState::CommandAcked < HandshakeState::Ready);
        assert_eq!(HandshakeState::CommandAcked.to_string(), "command-acked");
    }

    #[tokio::test]
    async fn test_handshake_async() {
        use tokio::io::AsyncReadExt;

        let (mut client, mut proxy) = tokio::io::duplex(256);
        let server = tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            proxy.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 5];
            proxy.read_exact(&mut head).await.unwrap();
            assert_eq!(&head[..4], &[0x05, 0x01, 0x00, 0x03]);
            let mut rest = vec![0u8; head[4] as usize + 2];
            proxy.read_exact(&mut rest).await.unwrap();
            assert_eq!(&rest[..11], b"example.org");

            proxy
                .write_all(&[0x05, 0x00, 0x00, 0x03, 0x01, b'x', 0x00, 0x00, b'!'])
                .await
                .unwrap();
        });

        handshake_async(&mut client, &target("example.org", 8080))
            .await
            .unwrap();
        let mut first = [0u8; 1];
        client.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"!");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_async_rejected() {
        let (mut client, mut proxy) = tokio::io::duplex(256);
        tokio::spawn(async move {
            proxy.write_all(&[0x05, 0x00, 0x05, 0x04]).await.unwrap();
            // keep the pipe open until the client is done
            let mut sink = [0u8; 64];
            let _ = tokio::io::AsyncReadExt::read(&mut proxy, &mut sink).await;
            let _ = tokio::io::AsyncReadExt::read(&mut proxy, &mut sink).await;
        });

        let err = handshake_async(&mut client, &target("example.org", 80))
            .await
            .unwrap_err();
        assert_eq!(err.connect_reason(), Some(ConnectReason::Rejected(0x04)));
    }
}
