// ============================================
// File: crates/ecowatt-server/src/main.rs
// ============================================
//! # EcoWatt Server Entry Point
//!
//! ## Creation Reason
//! Binary entry point: CLI parsing, logging setup, configuration
//! loading, server execution.
//!
//! ## Usage
//! ```bash
//! # Start with defaults (listens on 0.0.0.0:8080)
//! ecowatt-server start
//!
//! # Start with a config file
//! ecowatt-server start --config /etc/ecowatt/server.toml
//!
//! # Validate a config file without starting
//! ecowatt-server validate --config /etc/ecowatt/server.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A missing config file is not an error for `start`; the defaults
//!   reproduce the fleet's provisioned parameters.
//! - Use systemd for production deployments.
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ecowatt_server::{Server, ServerConfig};

// ============================================
// CLI Definition
// ============================================

/// EcoWatt cloud endpoint
#[derive(Parser, Debug)]
#[command(name = "ecowatt-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/ecowatt/server.toml")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/ecowatt/server.toml")]
        config: PathBuf,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging("info");

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config).await,
        Commands::Validate { config } => cmd_validate(config).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the server.
async fn cmd_start(config_path: PathBuf) -> anyhow::Result<()> {
    let config = if config_path.exists() {
        ServerConfig::load(&config_path).await?
    } else {
        info!("Config file not found, using defaults");
        ServerConfig::default()
    };

    // Re-initialize logging with the configured level.
    init_logging(&config.logging.level);

    let server = Server::new(config);
    server.run().await?;

    Ok(())
}

/// Validates a configuration file.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Server will use default values.");
        return Ok(());
    }

    let config = ServerConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Network:");
    println!("   Listen:           {}", config.network.listen_addr);
    println!();
    println!("Security:");
    println!("   Nonce expiry:     {}s", config.security.nonce_expiry_secs);
    println!("   Nonce window:     {}", config.security.nonce_window);
    println!();
    println!("Telemetry:");
    println!("   Debounce:         {}s", config.telemetry.flush_debounce_secs);
    match &config.telemetry.sink_url {
        Some(url) => println!("   Sink:             {url}"),
        None => println!("   Sink:             (none)"),
    }
    println!();
    println!("FOTA:");
    println!("   Chunk size:       {} bytes", config.fota.default_chunk_size);
    println!();
    println!("Storage:");
    println!("   Data dir:         {}", config.storage.data_dir);
    println!();

    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}
