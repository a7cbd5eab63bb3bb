use clap::Parser;
use socks5_connect::common::config::Config;
use socks5_connect::common::logger;
use socks5_connect::proxy::forward;
use socks5_connect::{connect, TargetAddress};
use std::path::Path;
use std::process;

#[derive(Parser, Debug)]
#[command(author, version, about = "Connect to host:port through a SOCKS5 proxy", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Proxy as host:port or socks5://host:port
    #[arg(short, long, value_name = "ADDRESS")]
    proxy: Option<String>,

    /// Destination as host:port
    #[arg(short, long, value_name = "HOST:PORT")]
    target: Option<String>,

    #[arg(long, value_name = "SECONDS")]
    proxy_timeout: Option<f64>,

    #[arg(long, value_name = "ADDRESS")]
    source_address: Option<String>,

    /// Read/write timeout for relayed traffic
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<f64>,

    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Only run the handshake and report the result
    #[arg(long)]
    probe: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn load_config(args: &Args) -> Config {
    let mut config = match &args.config {
        Some(path) => match Config::from_file(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config from {}: {}", path, e);
                process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(proxy) = &args.proxy {
        config.proxy.address = proxy.clone();
    }
    if let Some(target) = &args.target {
        config.target = Some(target.clone());
    }
    if let Some(timeout) = args.proxy_timeout {
        config.proxy.timeout = Some(timeout);
    }
    if let Some(source_address) = &args.source_address {
        config.proxy.source_address = Some(source_address.clone());
    }
    if let Some(timeout) = args.timeout {
        config.proxy.post_handshake_timeout = Some(timeout);
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        process::exit(1);
    }
    config
}

fn main() {
    let args = Args::parse();
    let config = load_config(&args);

    if args.print_config {
        match config.to_toml() {
            Ok(rendered) => print!("{}", rendered),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
        return;
    }

    logger::init(&config.log);
    log::debug!("Starting with config: {:?}", config);

    let target: TargetAddress = match config.target.as_deref().map(str::parse::<TargetAddress>) {
        Some(Ok(target)) => target,
        Some(Err(e)) => {
            eprintln!("{}", e);
            process::exit(2);
        }
        None => {
            eprintln!("No target given, use --target host:port");
            process::exit(2);
        }
    };
    let proxy = match config.proxy_endpoint() {
        Ok(proxy) => proxy,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let stream = match connect(&target, &proxy, &config.handshake_config()) {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("Failed to connect to {} via {}: {}", target, proxy, e);
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if args.probe {
        println!("SOCKS5 handshake with {} for {} succeeded", proxy, target);
        return;
    }

    if let Err(e) = forward::relay_stdio(stream) {
        log::error!("Relay to {} failed: {}", target, e);
        process::exit(1);
    }
}
