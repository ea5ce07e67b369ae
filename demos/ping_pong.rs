//! Ping-pong over a Unix domain socket.
//!
//! ```text
//! cargo run --example ping_pong -- server --socket /tmp/ping.sock
//! cargo run --example ping_pong -- client --socket /tmp/ping.sock --count 5
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;
use udsocket_rpc::handler::HandlerError;
use udsocket_rpc::{ChannelConfig, RpcChannel, RpcListener};

#[derive(Parser, Debug)]
#[command(name = "ping_pong")]
#[command(about = "Request/response round trips over a Unix socket")]
struct Args {
    /// Socket path
    #[arg(short, long, default_value = "/tmp/udsocket-rpc-ping.sock", global = true)]
    socket: PathBuf,

    /// Call timeout in milliseconds
    #[arg(long, default_value = "5000", global = true)]
    timeout_ms: u64,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Answer pings until interrupted
    Server,
    /// Send pings and report round-trip times
    Client {
        /// Number of pings
        #[arg(short, long, default_value = "10")]
        count: u32,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Ping {
    seq: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Pong {
    seq: u32,
    pid: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let config = ChannelConfig::default().timeout(Duration::from_millis(args.timeout_ms));

    match args.mode {
        Mode::Server => run_server(args.socket, config).await?,
        Mode::Client { count } => run_client(args.socket, config, count).await?,
    }
    Ok(())
}

async fn run_server(socket: PathBuf, config: ChannelConfig) -> udsocket_rpc::Result<()> {
    let listener = RpcListener::builder()
        .config(config)
        .on_connection(|channel| {
            info!("Client connected: {:?}", channel);
            channel.set_typed_handler(|ping: Ping| async move {
                Ok::<_, HandlerError>(Pong {
                    seq: ping.seq,
                    pid: std::process::id(),
                })
            });
        })
        .on_error(|err| tracing::warn!("Listener error: {}", err))
        .on_close(|| info!("Listener closed"))
        .start(&socket)
        .await?;

    info!("Listening on {}", listener.path().display());

    let _ = tokio::signal::ctrl_c().await;
    listener.close();
    listener.wait_for_shutdown().await;
    Ok(())
}

async fn run_client(socket: PathBuf, config: ChannelConfig, count: u32) -> udsocket_rpc::Result<()> {
    let channel = RpcChannel::connect(&socket, config).await?;

    for seq in 0..count {
        let started = Instant::now();
        let pong: Pong = channel.call_as(&Ping { seq }).await?;
        info!(
            "pong seq={} from pid {} in {:?}",
            pong.seq,
            pong.pid,
            started.elapsed()
        );
    }

    channel.close();
    channel.closed().await;
    Ok(())
}
