//! Top-level proxy service
//!
//! [`ProxyService`] constructs and wires everything: the transport (serial
//! or dry-run), the device session, the trigger engine, the handler chain,
//! and the TCP server. `start` brings the pipeline up in dependency order;
//! `stop` tears it down in reverse: stop accepting, close client sockets,
//! stop the device session, then wait for outstanding trigger subprocesses.

use crate::server::Server;
use gcodebridge_core::{Config, Error, GcodeFileLogger, HandlerChain, PipelineHandler};
use gcodebridge_device::{
    find_port_by_usb_id, DeviceSession, DryRunTransport, LineTransport, SerialTransport,
    SessionConfig,
};
use gcodebridge_triggers::TriggerEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tokio::sync::watch;

/// How long shutdown waits for trigger subprocesses
const TRIGGER_GRACE: Duration = Duration::from_secs(5);

/// The assembled proxy
pub struct ProxyService {
    session: Arc<DeviceSession>,
    engine: Arc<TriggerEngine>,
    server: Server,
}

impl std::fmt::Debug for ProxyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyService").finish_non_exhaustive()
    }
}

impl ProxyService {
    /// Build and start the whole pipeline from configuration
    ///
    /// `dry_run` substitutes the synthetic transport for the serial port;
    /// every other component behaves identically.
    pub async fn start(config: &Config, dry_run: bool) -> Result<Self, Error> {
        Self::start_with_handlers(config, dry_run, Vec::new()).await
    }

    /// Like [`ProxyService::start`], with extra pipeline handlers appended
    /// after the built-in ones
    pub async fn start_with_handlers(
        config: &Config,
        dry_run: bool,
        extra_handlers: Vec<Arc<dyn PipelineHandler>>,
    ) -> Result<Self, Error> {
        let mut chain = HandlerChain::new();
        if let Some(path) = &config.gcode_log_file {
            chain.push(Arc::new(GcodeFileLogger::open(path)?));
            info!("Logging GCode traffic to {}", path.display());
        }
        for handler in extra_handlers {
            chain.push(handler);
        }
        let handlers = Arc::new(chain);

        let engine = Arc::new(TriggerEngine::from_configs(&config.custom_triggers)?);
        if engine.rule_count() > 0 {
            info!("{} trigger rule(s) active", engine.rule_count());
        }

        let transport: Arc<dyn LineTransport> = if dry_run {
            info!("Dry-run mode: commands are accepted but not sent to hardware");
            Arc::new(DryRunTransport::new())
        } else {
            let path = match (&config.device.usb_id, &config.device.dev_path) {
                (Some(usb_id), _) if !usb_id.trim().is_empty() => {
                    find_port_by_usb_id(usb_id.trim())?
                }
                (_, Some(dev_path)) if !dev_path.trim().is_empty() => dev_path.trim().to_string(),
                _ => return Err(gcodebridge_core::ConfigError::DeviceNotSpecified.into()),
            };
            Arc::new(SerialTransport::open(
                &path,
                config.device.baud_rate,
                Duration::from_millis(config.device.serial_delay),
            )?)
        };

        let session = Arc::new(DeviceSession::start(
            transport,
            engine.clone(),
            handlers.clone(),
            SessionConfig {
                queue_limit: config.server.queue_limit,
                response_timeout: Duration::from_millis(config.device.response_timeout),
                liveness_period: Duration::from_millis(config.device.liveness_period),
                swallow_realtime_ok: config.device.swallow_realtime_ok,
            },
        ));

        let server = Server::start(
            &config.server.address,
            config.server.port,
            session.clone(),
            handlers,
        )
        .await?;

        Ok(Self {
            session,
            engine,
            server,
        })
    }

    /// The address the TCP listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// The device session, for health inspection
    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// A watch that flips to `false` when the device session ends
    ///
    /// Lets the binary shut the whole service down if the serial channel
    /// closes underneath it.
    pub fn session_running(&self) -> watch::Receiver<bool> {
        self.session.running()
    }

    /// Stop the service
    ///
    /// Ordering: stop accepting and close client sockets, stop the device
    /// session (drain, cancel prober, close transport), then wait for
    /// outstanding trigger subprocesses with a bounded grace period.
    pub async fn stop(&self) {
        self.server.stop().await;
        self.session.stop().await;
        self.engine.shutdown(TRIGGER_GRACE).await;
        info!("Proxy service stopped");
    }
}
