pub mod address;
pub mod connector;
pub mod error;
pub mod forward;
pub mod socks5;

#[allow(unused_imports)]
pub use connector::{connect, connect_with, Socks5Connector};
#[allow(unused_imports)]
pub use error::HandshakeError;
