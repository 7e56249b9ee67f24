//! Pipeline observation hooks
//!
//! Defines the handler trait invoked at the four fixed points of the proxy
//! pipeline: command received from a client, command sent to the device,
//! response received from the device, response sent back to the client.
//!
//! Implement [`PipelineHandler`] to observe or rewrite traffic. All methods
//! have no-op defaults, so partial implementations are fine. A handler error
//! never stops the pipeline: the caller logs it and continues with the
//! unmodified value.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

/// Outcome of a rewriting hook.
///
/// `Ok(line)` carries the (possibly rewritten) value; an empty string from
/// `on_gcode_received` drops the command.
pub type HookResult<T> = std::result::Result<T, HandlerError>;

/// Error raised by a handler implementation.
///
/// Logged at ERROR by the pipeline, which then proceeds with the value the
/// handler was given.
#[derive(Debug)]
pub struct HandlerError(pub String);

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler error: {}", self.0)
    }
}

impl std::error::Error for HandlerError {}

impl HandlerError {
    /// Create a handler error from a message
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Observation hooks for the proxy pipeline
///
/// Invoked exactly once per command/response in the matching direction.
#[async_trait]
pub trait PipelineHandler: Send + Sync {
    /// Called after a line is read from a client, before submission.
    ///
    /// May rewrite the line; returning an empty string drops it.
    async fn on_gcode_received(&self, line: &str, _client: SocketAddr) -> HookResult<String> {
        Ok(line.to_string())
    }

    /// Called immediately before the serial write.
    async fn on_gcode_sent(&self, _line: &str, _client: SocketAddr) -> HookResult<()> {
        Ok(())
    }

    /// Called after the terminal response is classified, before delivery.
    ///
    /// May rewrite the response.
    async fn on_response_received(
        &self,
        response: &str,
        _command: &str,
        _client: SocketAddr,
    ) -> HookResult<String> {
        Ok(response.to_string())
    }

    /// Called after the response was written to the client socket.
    async fn on_response_sent(&self, _response: &str, _client: SocketAddr) -> HookResult<()> {
        Ok(())
    }
}

/// Handler that forwards every hook to a list of handlers in order
///
/// Rewriting hooks thread the value through the chain; a failing link is
/// logged and skipped, leaving the value it received untouched.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn PipelineHandler>>,
}

impl HandlerChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the chain
    pub fn push(&mut self, handler: Arc<dyn PipelineHandler>) {
        self.handlers.push(handler);
    }

    /// Number of handlers in the chain
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the `gcode-received` hooks, returning the rewritten line.
    pub async fn gcode_received(&self, line: &str, client: SocketAddr) -> String {
        let mut current = line.to_string();
        for handler in &self.handlers {
            match handler.on_gcode_received(&current, client).await {
                Ok(rewritten) => current = rewritten,
                Err(e) => tracing::error!("gcode-received handler failed: {}", e),
            }
            if current.is_empty() {
                break;
            }
        }
        current
    }

    /// Run the `gcode-sent` hooks.
    pub async fn gcode_sent(&self, line: &str, client: SocketAddr) {
        for handler in &self.handlers {
            if let Err(e) = handler.on_gcode_sent(line, client).await {
                tracing::error!("gcode-sent handler failed: {}", e);
            }
        }
    }

    /// Run the `response-received` hooks, returning the rewritten response.
    pub async fn response_received(
        &self,
        response: &str,
        command: &str,
        client: SocketAddr,
    ) -> String {
        let mut current = response.to_string();
        for handler in &self.handlers {
            match handler.on_response_received(&current, command, client).await {
                Ok(rewritten) => current = rewritten,
                Err(e) => tracing::error!("response-received handler failed: {}", e),
            }
        }
        current
    }

    /// Run the `response-sent` hooks.
    pub async fn response_sent(&self, response: &str, client: SocketAddr) {
        for handler in &self.handlers {
            if let Err(e) = handler.on_response_sent(response, client).await {
                tracing::error!("response-sent handler failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl PipelineHandler for HandlerChain {
    async fn on_gcode_received(&self, line: &str, client: SocketAddr) -> HookResult<String> {
        Ok(self.gcode_received(line, client).await)
    }

    async fn on_gcode_sent(&self, line: &str, client: SocketAddr) -> HookResult<()> {
        self.gcode_sent(line, client).await;
        Ok(())
    }

    async fn on_response_received(
        &self,
        response: &str,
        command: &str,
        client: SocketAddr,
    ) -> HookResult<String> {
        Ok(self.response_received(response, command, client).await)
    }

    async fn on_response_sent(&self, response: &str, client: SocketAddr) -> HookResult<()> {
        self.response_sent(response, client).await;
        Ok(())
    }
}

/// Built-in handler that appends GCode traffic to a log file
///
/// One line per event: timestamp, direction, peer address, payload.
pub struct GcodeFileLogger {
    file: Mutex<File>,
}

impl GcodeFileLogger {
    /// Open (or create) the traffic log file in append mode
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn append(&self, direction: &str, client: SocketAddr, payload: &str) {
        let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{} - {} - {} - {:?}", stamp, direction, client, payload) {
            tracing::error!("Failed to write GCode log entry: {}", e);
        }
    }
}

#[async_trait]
impl PipelineHandler for GcodeFileLogger {
    async fn on_gcode_received(&self, line: &str, client: SocketAddr) -> HookResult<String> {
        self.append("recv", client, line);
        Ok(line.to_string())
    }

    async fn on_response_sent(&self, response: &str, client: SocketAddr) -> HookResult<()> {
        self.append("send", client, response);
        Ok(())
    }
}
