//! guestnet - virtual sockets for sandboxed guests
//!
//! Runs an echo round trip through the in-process loopback host.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use guestnet::bridge::LoopbackHost;
use guestnet::config::Config;
use guestnet::error::{Error, Result};
use guestnet::transport::Connection;

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    if args.gen_config {
        let json = serde_json::to_string_pretty(&Config::default())
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        println!("{}", json);
        return Ok(());
    }

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.echo.port = port;
    }
    if let Some(message) = args.message {
        config.echo.message = message;
    }

    // Initialize logging
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| config.log.level.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    info!("guestnet v{} starting...", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    let reply = rt.block_on(run_echo(&config))?;
    println!("{}", reply);

    info!("Goodbye!");
    Ok(())
}

/// Listen, dial ourselves through the host, and read the message back.
async fn run_echo(config: &Config) -> Result<String> {
    let (transport, _host) = LoopbackHost::spawn(&config.transport);

    let listener = transport.listen(config.echo.port)?;
    info!("Echo server listening on {}", listener.local_addr());

    let server = tokio::spawn(async move {
        while let Ok(conn) = listener.accept().await {
            tokio::spawn(serve_echo(conn));
        }
    });

    let target = format!("localhost:{}", config.echo.port);
    let mut conn = transport.dial(&target).await?;
    info!("Connected {} -> {}", conn.local_addr(), conn.remote_addr());

    let message = config.echo.message.as_bytes();
    conn.write(message)?;
    conn.set_read_deadline(Some(Instant::now() + Duration::from_millis(config.echo.timeout_ms)));

    let mut reply = Vec::with_capacity(message.len());
    let mut buf = [0u8; 1024];
    while reply.len() < message.len() {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        reply.extend_from_slice(&buf[..n]);
    }

    conn.close()?;
    server.abort();

    Ok(String::from_utf8_lossy(&reply).into_owned())
}

async fn serve_echo(mut conn: Connection) {
    let peer = conn.remote_addr();
    let mut buf = [0u8; 1024];

    loop {
        match conn.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = conn.write(&buf[..n]) {
                    debug!("Echo to {} failed: {}", peer, e);
                    break;
                }
            }
            Err(e) => {
                debug!("Read from {} failed: {}", peer, e);
                break;
            }
        }
    }

    debug!("Echo session with {} ended", peer);
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    gen_config: bool,
    port: Option<u16>,
    message: Option<String>,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut gen_config = false;
        let mut port = None;
        let mut message = None;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--port" => {
                    if i + 1 < args.len() {
                        port = args[i + 1].parse().ok();
                        i += 1;
                    }
                }
                "--message" => {
                    if i + 1 < args.len() {
                        message = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--gen-config" => gen_config = true,
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') && config.is_none() => {
                    // Positional argument: treat as config file
                    config = Some(PathBuf::from(arg));
                }
                _ => {}
            }
            i += 1;
        }

        Self {
            config,
            gen_config,
            port,
            message,
            version,
        }
    }
}

fn print_help() {
    println!(
        r#"guestnet - virtual sockets for sandboxed guests

USAGE:
    guestnet [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    --gen-config            Print the default configuration
    --port <PORT>           Virtual port of the echo server (default 1984)
    --message <TEXT>        Message sent through the echo round trip
    -v, --version           Print version information
    -h, --help              Print help information

EXAMPLES:
    guestnet --message ping
    guestnet -c guestnet.json
    guestnet --gen-config > guestnet.json
"#
    );
}

fn print_version() {
    println!("guestnet v{}", env!("CARGO_PKG_VERSION"));
    println!("Virtual socket transport over a host bridge");
}
