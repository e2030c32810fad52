//! Cassandra Sidecar
//!
//! Loads the YAML configuration, starts the REST API and the health-check
//! scheduler, and runs until interrupted.

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

use cassandra_sidecar::{Error, Result, SidecarConfiguration, SidecarDaemon};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Cassandra Sidecar - management process for local Cassandra instances
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the sidecar YAML configuration
    #[arg(long, env = "SIDECAR_CONFIG", default_value = "conf/sidecar.yaml")]
    config: PathBuf,

    /// Override the REST API bind host
    #[arg(long, env = "SIDECAR_HOST")]
    host: Option<String>,

    /// Override the REST API port
    #[arg(long, env = "SIDECAR_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting Cassandra Sidecar");
    info!("  Version: {}", cassandra_sidecar::VERSION);
    info!("  Config: {}", args.config.display());

    let mut config = SidecarConfiguration::load(&args.config)?;
    if let Some(host) = args.host {
        config.sidecar.host = host;
    }
    if let Some(port) = args.port {
        config.sidecar.port = port;
    }

    let daemon = SidecarDaemon::from_config(&config)?;
    daemon.start().await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Internal(format!("Failed to listen for shutdown signal: {}", e)))?;
    info!("Shutdown signal received");

    daemon.stop().await;
    info!("Sidecar shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |d: &str| -> Result<Directive> {
        d.parse()
            .map_err(|e| Error::Configuration(format!("invalid log directive {}: {}", d, e)))
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("reqwest=warn")?)
        .add_directive(directive("tower=warn")?)
        .add_directive(directive("axum=info")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
