//! # GCodeBridge
//!
//! A TCP-to-serial proxy for GRBL-style GCode motion controllers:
//! - Multiplexes any number of TCP clients onto a single serial device
//! - Strict one-command-in-flight pairing of commands and acknowledgements
//! - Periodic `?` liveness probes that never disturb client traffic
//! - Regex-matched triggers that fire shell commands on outgoing GCode
//! - Dry-run mode for running the whole pipeline without hardware
//!
//! ## Architecture
//!
//! GCodeBridge is organized as a workspace with multiple crates:
//!
//! 1. **gcodebridge-core** - Errors, configuration, pipeline hooks
//! 2. **gcodebridge-device** - Transports, discovery, device session
//! 3. **gcodebridge-triggers** - Trigger rules and subprocess execution
//! 4. **gcodebridge-server** - TCP server, connections, service wiring
//! 5. **gcodebridge** - Main binary that integrates all crates

pub use gcodebridge_core::{
    default_config_path, Config, ConfigError, DeviceConfig, Error, GcodeFileLogger, HandlerChain,
    PipelineHandler, Result, ServerConfig, SessionError, TransportError, TriggerConfig,
};
pub use gcodebridge_device::{
    find_port_by_usb_id, Command, DeviceSession, DryRunTransport, LineTransport, Response,
    ResponseClass, SerialTransport, SessionConfig,
};
pub use gcodebridge_server::{ClientConnection, ProxyService, Server};
pub use gcodebridge_triggers::{TriggerEngine, TriggerRule};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with console output and RUST_LOG environment
/// variable support. `verbose` lowers the default level to DEBUG, `quiet`
/// raises it to ERROR; RUST_LOG overrides both.
pub fn init_logging(verbose: bool, quiet: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let default_level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
