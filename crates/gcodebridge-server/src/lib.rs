//! # GCodeBridge Server
//!
//! The network side of the proxy: the TCP listener, per-client connection
//! handling, and the top-level service that wires transport, session,
//! triggers and handlers together.

pub mod connection;
pub mod server;
pub mod service;

pub use connection::ClientConnection;
pub use server::Server;
pub use service::ProxyService;
