//! peer-bridge binary: stdio host on one side, WebSocket peer on the other.

use anyhow::{Context, Result};
use clap::Parser;
use peer_bridge::telemetry::init_logging;
use peer_bridge::{BridgeConfig, BridgeService};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "peer-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the peer WebSocket listener binds to
    #[arg(long)]
    host: Option<IpAddr>,

    /// Peer WebSocket listener port
    #[arg(long, short)]
    port: Option<u16>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Round-trip timeout in milliseconds
    #[arg(long)]
    round_trip_timeout_ms: Option<u64>,

    /// How long to wait for a peer in milliseconds
    #[arg(long)]
    connection_timeout_ms: Option<u64>,

    /// Wait for the first peer before serving the host
    #[arg(long)]
    wait_for_peer: bool,
}

impl Args {
    fn apply(self, config: &mut BridgeConfig) {
        if let Some(host) = self.host {
            config.peer.host = host;
        }
        if let Some(port) = self.port {
            config.peer.port = port;
        }
        if self.verbose {
            config.logging.verbose = true;
        }
        if self.json_logs {
            config.logging.json = true;
        }
        if let Some(ms) = self.round_trip_timeout_ms {
            config.timeouts.round_trip = Duration::from_millis(ms);
        }
        if let Some(ms) = self.connection_timeout_ms {
            config.timeouts.connection_wait = Duration::from_millis(ms);
        }
        if self.wait_for_peer {
            config.wait_for_peer = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = BridgeConfig::from_env().context("invalid environment configuration")?;
    args.apply(&mut config);

    init_logging(&config.logging).context("failed to initialize logging")?;

    let service = BridgeService::new(config).context("failed to create bridge")?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting peer bridge");

    tokio::select! {
        result = service.run(tokio::io::stdin(), tokio::io::stdout()) => {
            if let Err(e) = &result {
                error!(error = %e, "Bridge failed");
            }
            result?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("Received shutdown signal");
        }
    }

    Ok(())
}
