// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! hlsthumb — streaming thumbnail generator for live HLS playlists
//!
//! Usage:
//!   hlsthumb serve  --config config.toml
//!   hlsthumb status --config config.toml

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hlsthumb::config::Config;
use hlsthumb::{api, manager::GeneratorManager};

#[derive(Parser)]
#[command(name = "hlsthumb", about = "Streaming thumbnail generator for live HLS playlists", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start watching all configured streams.
    Serve {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print a brief status snapshot and exit.
    Status {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
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
        Command::Status { config } => run_status(config),
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

    info!(streams = cfg.streams.len(), port = cfg.server.port, "Starting hlsthumb");

    let manager = match GeneratorManager::new(&cfg) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "Failed to start generator manager");
            std::process::exit(1);
        }
    };
    let manager = std::sync::Arc::new(manager);

    if cfg.server.enabled {
        let state = std::sync::Arc::new(api::AppState { manager: manager.clone() });
        let port = cfg.server.port;
        tokio::spawn(async move {
            api::start_server(state, port).await;
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL+C, shutting down…"),
        Err(e) => error!(error = %e, "Signal error"),
    }

    match std::sync::Arc::try_unwrap(manager) {
        Ok(manager) => manager.shutdown().await,
        Err(_arc) => {
            tracing::warn!("Forcing shutdown while API still holds references");
        }
    }
}

fn run_status(config_path: PathBuf) {
    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    };

    println!("=== hlsthumb Status ===");
    println!("Streams     : {}", cfg.streams.len());
    println!("Control API : {}", if cfg.server.enabled { format!("enabled on :{}", cfg.server.port) } else { "disabled".to_string() });
    for stream in &cfg.streams {
        let id = stream.id.clone().unwrap_or_else(|| hlsthumb::generator::derive_id(&stream.playlist_url));
        println!("  {} — {}", id, stream.playlist_url);
    }
}
