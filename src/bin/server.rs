//! CaskKV Server Binary
//!
//! Starts the TCP server for CaskKV.

use std::sync::Arc;
use std::time::Duration;

use caskkv::network::Server;
use caskkv::{Config, Engine};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// CaskKV Server
#[derive(Parser, Debug)]
#[command(name = "caskkv-server")]
#[command(about = "Log-structured key-value store with a line-based TCP protocol")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./caskkv_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Segment size in MB before rotation
    #[arg(short = 's', long, default_value = "64")]
    segment_mb: u64,

    /// Run compaction every N seconds (0 = never)
    #[arg(short = 'c', long, default_value = "0")]
    compaction_interval_secs: u64,

    /// Don't write hint files for sealed segments
    #[arg(long)]
    no_hints: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caskkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("CaskKV Server v{}", caskkv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let compaction_interval = match args.compaction_interval_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    // Build config from args
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .segment_size_limit(args.segment_mb * 1024 * 1024)
        .compaction_interval(compaction_interval)
        .write_hint_files(!args.no_hints)
        .build();

    // Open engine
    let engine = match Engine::open(config.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Engine initialized successfully");

    let mut server = Server::new(config, Arc::clone(&engine));

    // On SIGINT/SIGTERM the accept loop exits and the engine is synced and
    // closed below
    if let Err(e) = server.shutdown_on_signal() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = engine.close() {
        tracing::error!("Error closing engine: {}", e);
    }

    tracing::info!("Server stopped");
}
