//! GCodeBridge entry point
//!
//! Loads configuration (CLI arguments over file values over defaults),
//! starts the proxy service, and runs until Ctrl-C / SIGTERM or until the
//! serial channel closes underneath the session.

use anyhow::Context;
use clap::Parser;
use gcodebridge::{default_config_path, init_logging, Config, ProxyService};
use std::path::PathBuf;
use tracing::{error, info};

/// Forward GCode commands from TCP clients to a USB serial device
#[derive(Parser, Debug)]
#[command(name = "gcodebridge", version, about)]
struct Cli {
    /// Path to the configuration file (.toml or .json)
    #[arg(short, long, env = "GCODEBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// TCP server port
    #[arg(short, long)]
    port: Option<u16>,

    /// TCP server bind address
    #[arg(short, long)]
    address: Option<String>,

    /// USB device ID in vendor:product format (e.g., 303a:4001)
    #[arg(short = 'd', long = "usb-id")]
    usb_id: Option<String>,

    /// Device path like /dev/ttyACM0
    #[arg(long)]
    dev_path: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    baud_rate: Option<u32>,

    /// Run without hardware; responses are synthesised
    #[arg(long)]
    dry_run: bool,

    /// Write a default configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    /// Load the config file and apply CLI overrides on top.
    fn load_config(&self) -> anyhow::Result<Config> {
        let path = self.config.clone().unwrap_or_else(default_config_path);

        let mut config = if path.exists() {
            Config::load_from_file(&path)
                .with_context(|| format!("loading {}", path.display()))?
        } else if self.config.is_some() {
            anyhow::bail!("config file not found: {}", path.display());
        } else {
            Config::default()
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(address) = &self.address {
            config.server.address = address.clone();
        }
        if let Some(usb_id) = &self.usb_id {
            config.device.usb_id = Some(usb_id.clone());
            config.device.dev_path = None;
        }
        if let Some(dev_path) = &self.dev_path {
            config.device.dev_path = Some(dev_path.clone());
            config.device.usb_id = None;
        }
        if let Some(baud_rate) = self.baud_rate {
            config.device.baud_rate = baud_rate;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet)?;

    if cli.generate_config {
        let target = cli.config.clone().unwrap_or_else(default_config_path);
        Config::default()
            .save_to_file(&target)
            .with_context(|| format!("writing {}", target.display()))?;
        println!("Configuration file generated: {}", target.display());
        return Ok(());
    }

    let config = cli.load_config()?;
    config.validate(cli.dry_run)?;

    info!(
        "Starting GCodeBridge {} (built {})",
        gcodebridge::VERSION,
        gcodebridge::BUILD_DATE
    );
    info!("  Server: {}:{}", config.server.address, config.server.port);
    match (&config.device.usb_id, &config.device.dev_path) {
        _ if cli.dry_run => info!("  Device: dry-run"),
        (Some(usb_id), _) => info!("  Device: {} @ {} baud", usb_id, config.device.baud_rate),
        (_, Some(dev_path)) => info!("  Device: {} @ {} baud", dev_path, config.device.baud_rate),
        _ => {}
    }

    let service = ProxyService::start(&config, cli.dry_run).await?;
    let mut session_running = service.session_running();

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = session_running.changed() => {
            if !*session_running.borrow() {
                error!("Device session ended; shutting down");
            }
        }
    }

    service.stop().await;
    info!("GCodeBridge stopped");

    Ok(())
}

/// Wait for Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Shutdown signal received"),
        _ = terminate => info!("Termination signal received"),
    }
}
