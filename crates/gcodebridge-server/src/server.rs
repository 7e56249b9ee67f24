//! TCP server
//!
//! Listens on the configured address, accepts connections without a
//! per-host limit, and spawns a [`ClientConnection`] task per accept.
//! Shutdown stops accepting, signals every connection, and waits a short
//! grace period before aborting stragglers.

use crate::connection::ClientConnection;
use gcodebridge_core::{HandlerChain, TransportError};
use gcodebridge_device::DeviceSession;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

/// How long shutdown waits for connection tasks before aborting them
const CONNECTION_GRACE: Duration = Duration::from_millis(500);

/// The proxy's TCP listener
pub struct Server {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind the listener and start accepting connections
    ///
    /// Binding to port 0 picks an ephemeral port; see [`Server::local_addr`].
    pub async fn start(
        address: &str,
        port: u16,
        session: Arc<DeviceSession>,
        handlers: Arc<HandlerChain>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind((address, port)).await?;
        let local_addr = listener.local_addr()?;
        info!("GCode proxy server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, session, handlers, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// The address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close client connections, and wait for them briefly
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if task.await.is_err() {
                warn!("Accept loop ended abnormally");
            }
        }
        info!("GCode proxy server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<DeviceSession>,
    handlers: Arc<HandlerChain>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Client connected: {}", peer);
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    let connection =
                        ClientConnection::new(peer, session.clone(), handlers.clone());
                    connections.spawn(connection.run(stream, shutdown_rx.clone()));

                    // Reap connections that have already finished.
                    while connections.try_join_next().is_some() {}
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
        }
    }

    // Listener drops here: no further accepts. Give the connections their
    // grace period to finish any in-flight device round-trip.
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(CONNECTION_GRACE, drain).await.is_err() {
        warn!(
            "Aborting {} client connection(s) still active after {:?}",
            connections.len(),
            CONNECTION_GRACE
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
}
