// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Transcoder Broker — multiplexes a live MPEG-TS feed from an external
//! transcoder subprocess out to many concurrent stream subscribers.
//!
//! Usage:
//!   broker serve   --config config.toml
//!   broker inspect --config config.toml --channel 10.0.0.1_554_1_1_1920_1080

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use transcoder_broker::api::{self, AppState};
use transcoder_broker::broker::TranscoderBroker;
use transcoder_broker::config::Config;

#[derive(Parser)]
#[command(name = "broker", about = "Transcoder Broker", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the broker and its HTTP/WebSocket API.
    Serve {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print one channel's snapshot and exit (requires a running broker's
    /// config to know where storage-free state lives — since the broker
    /// keeps no state across restarts, this is only useful while `serve`
    /// is already running elsewhere and exposing the HTTP API).
    Inspect {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        channel: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => run_serve(config).await,
        Command::Inspect { config, channel } => run_inspect(config, &channel).await,
    }
}

async fn run_serve(config_path: PathBuf) {
    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        transcoder = ?cfg.transcoder.binary_path,
        ports = format!("{}..{}", cfg.ports.start, cfg.ports.end),
        "Starting Transcoder Broker"
    );

    let broker = TranscoderBroker::new(cfg.clone());

    if cfg.api.enabled {
        let state = Arc::new(AppState {
            broker: broker.clone(),
        });
        let port = cfg.api.port;
        tokio::spawn(async move {
            api::start_server(state, port).await;
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL+C, shutting down…"),
        Err(e) => error!(error = %e, "Signal error"),
    }

    broker.shutdown_all().await;
}

async fn run_inspect(config_path: PathBuf, channel: &str) {
    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    };

    let url = format!(
        "http://127.0.0.1:{}/api/channels/{}",
        cfg.api.port, channel
    );
    match reqwest::get(&url).await {
        Ok(resp) => match resp.text().await {
            Ok(body) => println!("{body}"),
            Err(e) => {
                eprintln!("Error reading response: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error contacting broker at {url}: {e}");
            std::process::exit(1);
        }
    }
}
