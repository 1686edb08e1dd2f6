use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::prelude::*;

use geo_relay::cli::{self, ClientError, PushOptions};
use geo_relay::config::{self, CliOverrides, FileConfig, RelayConfig};
use geo_relay::service::RelayService;

#[derive(Parser)]
#[command(name = "geo-relay")]
#[command(about = "Relay a producer's live position to WebSocket consumers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default)
    Serve(ServeArgs),

    /// Connect as a consumer and print received positions
    Watch(WatchArgs),

    /// Act as a producer and post the local clock with a fixed position
    Push(PushArgs),
}

#[derive(Parser, Default)]
struct ServeArgs {
    /// Config file (defaults to ./geo-relay.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address both listeners bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the ingest (HTTP) listener
    #[arg(long)]
    ingest_port: Option<u16>,

    /// Port for the broadcast (WebSocket) listener
    #[arg(long)]
    broadcast_port: Option<u16>,

    /// Broadcast interval in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct WatchArgs {
    /// Broadcast listener URL
    #[arg(long, default_value = "ws://127.0.0.1:8082")]
    url: String,

    /// Decode each line instead of printing it raw
    #[arg(long)]
    parse: bool,
}

#[derive(Parser)]
struct PushArgs {
    /// Ingest listener base URL
    #[arg(long, default_value = "http://127.0.0.1:8081")]
    url: String,

    /// Latitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Longitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Repeat every N milliseconds instead of posting once
    #[arg(long)]
    every_ms: Option<u64>,

    /// Stop after N posts (with --every-ms)
    #[arg(long)]
    count: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => run_server(ServeArgs::default()).await,
        Some(Commands::Serve(args)) => run_server(args).await,
        Some(Commands::Watch(args)) => client_result(cli::watch(&args.url, args.parse).await),
        Some(Commands::Push(args)) => {
            let options = PushOptions {
                url: args.url,
                latitude: args.lat,
                longitude: args.lon,
                every: args.every_ms.map(Duration::from_millis),
                count: args.count,
            };
            client_result(cli::push(&options).await.map(|_| ()))
        }
    }
}

fn client_result(result: Result<(), ClientError>) -> Result<()> {
    match result {
        Err(ClientError::Unavailable) => {
            eprintln!("geo-relay: relay is not reachable");
            std::process::exit(1);
        }
        other => other.map_err(Into::into),
    }
}

async fn run_server(args: ServeArgs) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "geo_relay=debug,tower_http=debug,info"
    } else {
        "geo_relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting geo-relay");

    let mut file_config: FileConfig = config::load_config(args.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    file_config.apply_overrides(&CliOverrides {
        host: args.host,
        ingest_port: args.ingest_port,
        broadcast_port: args.broadcast_port,
        tick_interval_ms: args.tick_ms,
    });
    let relay_config = RelayConfig::from_file(&file_config)?;
    info!(
        "Relay config: tick={}ms, send_buffer={}",
        relay_config.websocket.tick_interval.as_millis(),
        relay_config.websocket.send_channel_capacity
    );

    let relay = RelayService::new(relay_config).bind().await?;

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    relay.serve(shutdown_signal).await?;
    info!("Shutdown complete");
    Ok(())
}
