//! Per-client connection handling
//!
//! Each accepted socket gets a [`ClientConnection`]: it reads the byte
//! stream, splits it into lines, trims `\r`, drops empty lines, runs the
//! `gcode-received` hook, and submits each surviving line to the device
//! session. At most one command per connection is in flight at the device;
//! the write path awaits each response before the next line is submitted,
//! giving every client the request/response illusion of talking to the
//! device directly.

use gcodebridge_core::HandlerChain;
use gcodebridge_device::DeviceSession;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One TCP client of the proxy
pub struct ClientConnection {
    id: Uuid,
    peer: SocketAddr,
    session: Arc<DeviceSession>,
    handlers: Arc<HandlerChain>,
}

impl ClientConnection {
    /// Create a connection handler for an accepted socket
    pub fn new(
        peer: SocketAddr,
        session: Arc<DeviceSession>,
        handlers: Arc<HandlerChain>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            session,
            handlers,
        }
    }

    /// Connection identifier used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Drive the connection until EOF, I/O error, or shutdown
    pub async fn run(self, stream: TcpStream, mut shutdown_rx: watch::Receiver<bool>) {
        let peer = self.peer;
        debug!(connection = %self.id, "Client connected: {}", peer);

        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            let next = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(connection = %self.id, "Connection closing for shutdown");
                        break;
                    }
                    continue;
                }
                next = lines.next_line() => next,
            };

            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    debug!(connection = %self.id, "Client closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(connection = %self.id, "Read error from {}: {}", peer, e);
                    break;
                }
            };

            let line = raw.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }

            let command = self.handlers.gcode_received(line, peer).await;
            if command.is_empty() {
                debug!(connection = %self.id, "Handler dropped line: {:?}", line);
                continue;
            }

            let response = match self.session.submit(command, peer).await {
                Ok(response) => response,
                Err(e) => {
                    info!(connection = %self.id, "Closing {}: {}", peer, e);
                    break;
                }
            };

            let mut failed = false;
            for preamble in &response.preamble {
                if let Err(e) = write_line(&mut write_half, preamble).await {
                    warn!(connection = %self.id, "Write error to {}: {}", peer, e);
                    failed = true;
                    break;
                }
            }
            if failed {
                break;
            }
            if let Err(e) = write_line(&mut write_half, &response.terminal).await {
                warn!(connection = %self.id, "Write error to {}: {}", peer, e);
                break;
            }

            self.handlers.response_sent(&response.terminal, peer).await;
        }

        info!("Client disconnected: {}", peer);
    }
}

async fn write_line(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    line: &str,
) -> std::io::Result<()> {
    write_half.write_all(line.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    Ok(())
}
