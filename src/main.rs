//! RIVES gameplay verifier
//!
//! Runs inside the rollup machine. Every advance input carries a claimed
//! output digest and a gameplay log; the log is replayed in the RIVOS
//! sandbox and, when the replay reproduces the claimed digest, the score is
//! committed as a notice. Anything else is answered with a report.

mod app;
mod checkpoint;
mod config;
mod emulator;
mod error;
mod gameplay_verifier;
mod handlers;
mod response;
mod rollup_client;
mod types;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::Application;
use crate::config::Config;
use crate::emulator::RivEmulator;
use crate::gameplay_verifier::GameplayVerifier;
use crate::rollup_client::HttpRollup;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "verifier.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting RIVES gameplay verifier");

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config file {}: {}. Using environment variables.", args.config, e);
            Config::from_env().context("Failed to load configuration from environment variables")?
        }
    };
    info!("Configuration loaded: {:?}", config);

    let rollup = HttpRollup::new(&config.rollup_http_server_url, config.max_payload_size, config.max_retries)?;
    let emulator = RivEmulator::new(&config.chroot_bin, &config.rivos_root, config.replay_timeout());
    let verifier = GameplayVerifier::new(emulator, &config.cartridge_path, &config.scratch_dir);

    let app = Application::new(rollup, verifier, &config.checkpoint_path);
    if let Err(e) = app.run().await {
        error!("Request loop stopped: {}", e);
        return Err(e.into());
    }

    Ok(())
}
