//! Trigger engine
//!
//! Holds the immutable, compiled rule table and fires subprocesses when an
//! outgoing GCode line matches. Evaluation is synchronous regex scanning;
//! execution is a detached task per match, tracked in a live-set so shutdown
//! can wait for stragglers with a bounded grace period.

use crate::rule::TriggerRule;
use gcodebridge_core::{ConfigError, TriggerConfig};
use parking_lot::Mutex;
use std::process::Stdio;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Longest stderr tail reported for a failed trigger
const STDERR_TAIL_CHARS: usize = 200;

/// The trigger engine
///
/// The rule set is immutable after construction; all matching rules fire
/// for a given line, in configuration order.
pub struct TriggerEngine {
    rules: Vec<TriggerRule>,
    live: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for TriggerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerEngine").finish_non_exhaustive()
    }
}

impl TriggerEngine {
    /// Build the engine from configuration, compiling every rule
    ///
    /// Fails on the first rule whose pattern does not compile.
    pub fn from_configs(configs: &[TriggerConfig]) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(configs.len());
        for config in configs {
            let rule = TriggerRule::from_config(config)?;
            info!("Loaded trigger '{}': {}", rule.id, config.trigger.pattern);
            rules.push(rule);
        }
        Ok(Self {
            rules,
            live: Mutex::new(JoinSet::new()),
        })
    }

    /// An engine with no rules
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            live: Mutex::new(JoinSet::new()),
        }
    }

    /// Number of compiled rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Scan the rule table and spawn a subprocess for every match
    ///
    /// Returns the number of rules that fired. Must be called from within a
    /// tokio runtime; the spawned tasks are detached from the caller.
    pub fn evaluate(&self, gcode: &str) -> usize {
        let mut fired = 0;
        let mut live = self.live.lock();

        // Reap finished entries so the set doesn't grow with uptime.
        while live.try_join_next().is_some() {}

        for rule in &self.rules {
            if rule.matches(gcode) {
                let id = rule.id.clone();
                let command = rule.command.clone();
                live.spawn(run_trigger(id, command));
                fired += 1;
            }
        }
        fired
    }

    /// Number of trigger tasks not yet reaped
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Wait for outstanding trigger tasks with a bounded grace period
    ///
    /// Tasks still running when the grace period expires are dropped; their
    /// subprocesses are left to the OS.
    pub async fn shutdown(&self, grace: Duration) {
        let mut live = std::mem::take(&mut *self.live.lock());
        if live.is_empty() {
            return;
        }

        info!("Waiting for {} pending trigger task(s)", live.len());
        let drain = async {
            while live.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            error!(
                "{} trigger task(s) still running after {:?} grace period",
                live.len(),
                grace
            );
        }
    }
}

/// Run one trigger command through the system shell and log the outcome.
async fn run_trigger(id: String, command: String) {
    info!("Executing trigger '{}': {}", id, command);

    #[cfg(unix)]
    let mut shell = {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command);
        cmd
    };
    #[cfg(windows)]
    let mut shell = {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.arg("/C").arg(&command);
        cmd
    };

    let output = shell
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            info!("Trigger '{}' executed successfully (exit code: 0)", id);
        }
        Ok(output) => {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                "Trigger '{}' failed with exit code {}: {}",
                id,
                code,
                stderr_tail(&stderr)
            );
        }
        Err(e) => {
            error!("Trigger '{}' failed to spawn: {}", id, e);
        }
    }
    debug!("Trigger '{}' task finished", id);
}

/// Last portion of a subprocess's stderr, trimmed for the log line.
fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(STDERR_TAIL_CHARS.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    trimmed[start..].to_string()
}
