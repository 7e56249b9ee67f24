//! # GCodeBridge Triggers
//!
//! Regex-matched trigger rules that fire shell subprocesses when GCode
//! lines pass through the proxy. The rule table is compiled once at startup
//! and immutable afterwards; subprocess execution is detached from the
//! command pipeline and tracked for graceful shutdown.

pub mod engine;
pub mod rule;

pub use engine::TriggerEngine;
pub use rule::TriggerRule;
