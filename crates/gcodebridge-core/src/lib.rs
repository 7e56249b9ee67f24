//! # GCodeBridge Core
//!
//! Core types and utilities for the GCodeBridge proxy.
//! Provides the error taxonomy, the configuration model, and the pipeline
//! observation hooks shared by the device and server crates.

pub mod config;
pub mod error;
pub mod handlers;

pub use config::{
    default_config_path, Config, DeviceConfig, ServerConfig, TriggerConfig, TriggerMatchConfig,
};
pub use error::{ConfigError, Error, Result, SessionError, TransportError};
pub use handlers::{GcodeFileLogger, HandlerChain, HandlerError, HookResult, PipelineHandler};
