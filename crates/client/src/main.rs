//! GameLink client
//!
//! Connects to a game server, keeps the link alive with pings and reports
//! latency until the server goes away or the tick budget runs out.

use anyhow::Context;
use clap::Parser;
use gamelink_config::{ClientOptions, DEFAULT_OPTIONS_PATH};
use gamelink_core::ConnectionState;
use gamelink_network::ServerConnection;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client options file
    #[arg(short, long, default_value = DEFAULT_OPTIONS_PATH)]
    config: PathBuf,

    /// Server host, overrides the options file
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port, overrides the options file
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of ticks to run, 0 runs until disconnected
    #[arg(short, long, default_value = "0")]
    ticks: u64,

    /// Milliseconds between ticks
    #[arg(long, default_value = "16")]
    tick_ms: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    info!("GameLink client starting up...");
    info!("Loading options from {}...", args.config.display());

    let mut options = match ClientOptions::load_from_file(&args.config) {
        Ok(options) => {
            info!("Options loaded");
            options
        }
        Err(e) => {
            warn!("Failed to load {}: {}", args.config.display(), e);
            warn!("Using default options");
            ClientOptions::default()
        }
    };

    if let Some(host) = args.host {
        options.server_host = host;
    }
    if let Some(port) = args.port {
        options.server_port = port;
    }
    options.display();

    let settings = options
        .into_network_settings()
        .context("invalid client options")?;

    let mut conn = ServerConnection::new(settings);

    let connected = Rc::new(Cell::new(None::<bool>));
    {
        let connected = Rc::clone(&connected);
        conn.add_connect_handler(move |ok| {
            if ok {
                info!("Connected to server");
            } else {
                error!("Connection to server failed");
            }
            connected.set(Some(ok));
        });
    }
    conn.add_disconnect_handler(|| info!("Disconnected from server"));

    conn.connect().context("connect")?;

    let tick = Duration::from_millis(args.tick_ms);
    let mut last_report = Instant::now();
    let mut tick_count = 0u64;

    loop {
        conn.process();
        tick_count += 1;

        if conn.state() == ConnectionState::Disconnected {
            break;
        }

        if last_report.elapsed() >= Duration::from_secs(5) {
            last_report = Instant::now();
            let traffic = conn.traffic();
            match conn.ping() {
                Some(ping) => info!(
                    "Ping {} ms, {} bytes in ({} unpacked), {} bytes out",
                    ping.as_millis(),
                    traffic.bytes_received,
                    traffic.bytes_real_received,
                    traffic.bytes_sent
                ),
                None => info!("No ping measured yet, {} bytes out", traffic.bytes_sent),
            }
        }

        if args.ticks > 0 && tick_count >= args.ticks {
            info!("Tick budget of {} reached", args.ticks);
            break;
        }

        thread::sleep(tick);
    }

    conn.disconnect();

    if connected.get() != Some(true) {
        anyhow::bail!("never connected to {}", conn.settings().server_host);
    }

    info!("Client shutting down");
    Ok(())
}
