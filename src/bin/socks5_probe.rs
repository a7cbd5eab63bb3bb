use socks5_connect::proxy::socks5::greet;
use socks5_connect::{Dialer, ProxyEndpoint, TcpDialer, DEFAULT_PROXY_TIMEOUT};

fn main() {
    let proxy = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1080".to_string());

    match probe(&proxy) {
        Ok(()) => {
            println!("SOCKS5 proxy greeting test passed");
            std::process::exit(0);
        }
        Err(e) => {
            println!("SOCKS5 proxy test failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Sends the no-auth greeting and checks the method selection.
fn probe(proxy: &str) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint: ProxyEndpoint = proxy.parse()?;
    println!("Connecting to SOCKS5 proxy at {}...", endpoint);

    let mut sock = TcpDialer.dial(&endpoint, Some(DEFAULT_PROXY_TIMEOUT), None)?;
    println!("Connected successfully");

    greet(&mut sock)?;
    println!("Proxy accepted method 0x00 (no authentication)");
    Ok(())
}
