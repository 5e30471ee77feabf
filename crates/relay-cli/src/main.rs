//! Relay CLI - background ↔ UI transport demo
//!
//! # Configuration
//!
//! Transport configuration is loaded from multiple sources with priority:
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`RELAY_*`)
//! 3. Config file (`--config`, or `relay.toml` in the current directory)
//! 4. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `RELAY_LOG`: Log filter directive when neither `--debug` nor `--verbose` is set
//! - `RELAY_MAX_MESSAGE_SIZE`: Largest wire unit in bytes
//! - `RELAY_REASSEMBLY_TIMEOUT_MS`: Partial message lifetime
//! - `RELAY_MAX_IN_FLIGHT`: Concurrent partial messages per port
//! - `RELAY_MAX_BUFFERED_BYTES`: Bytes held by partial messages per port
//! - `RELAY_CALL_TIMEOUT_MS`: Remote call timeout

mod demo;

use anyhow::Result;
use clap::Parser;
use relay_port::{ConfigError, ConfigLoader, TransportConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Relay CLI - background ↔ UI transport demo
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Transport config file (defaults to ./relay.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Ignore RELAY_* environment overrides
    #[arg(long)]
    no_env: bool,

    /// Largest wire unit in bytes (also: RELAY_MAX_MESSAGE_SIZE)
    #[arg(long, value_name = "BYTES")]
    max_message_size: Option<usize>,

    /// Remote call timeout in milliseconds (also: RELAY_CALL_TIMEOUT_MS)
    #[arg(long, value_name = "MS")]
    call_timeout_ms: Option<u64>,

    /// Approximate size of the state snapshot pushed to the UI
    #[arg(long, value_name = "BYTES", default_value_t = 5_000_000)]
    snapshot_size: usize,
}

/// Loads file/env config and applies CLI overrides as the top layer.
fn resolve_config(args: &Args) -> Result<TransportConfig, ConfigError> {
    let mut loader = ConfigLoader::new();
    if let Some(ref path) = args.config {
        loader = loader.with_config_file(path);
    }
    if args.no_env {
        loader = loader.skip_env_vars();
    }

    let mut config = loader.load()?;
    if let Some(size) = args.max_message_size {
        config.max_message_size = size;
    }
    if let Some(ms) = args.call_timeout_ms {
        config.call_timeout_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // --debug > --verbose > RELAY_LOG > default "warn"
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else if args.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_env("RELAY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_filter(filter))
        .init();

    let config = resolve_config(&args).map_err(|e| anyhow::anyhow!("Config error: {e}"))?;
    info!(
        max_message_size = config.max_message_size,
        frame_payload = config.max_frame_payload(),
        "Transport config resolved"
    );

    println!("Relay v{}", env!("CARGO_PKG_VERSION"));
    let report = demo::run(config, args.snapshot_size).await?;
    println!("{report}");
    Ok(())
}
